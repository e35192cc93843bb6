//! The persisted finding: one inspection of one job at one point in time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `phase2_score` value meaning "phase 2 never produced a score".
pub const PHASE2_NOT_EVALUATED: i32 = -1;

/// Human disposition of a finding.
///
/// Stored as the integers 1/2/3 so the admin side can sort and filter
/// without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending = 1,
    Confirmed = 2,
    Ignored = 3,
}

impl ReviewStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::Pending),
            2 => Some(Self::Confirmed),
            3 => Some(Self::Ignored),
            _ => None,
        }
    }

    pub fn is_reviewed(self) -> bool {
        self != Self::Pending
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Pending => write!(f, "pending"),
            ReviewStatus::Confirmed => write!(f, "confirmed"),
            ReviewStatus::Ignored => write!(f, "ignored"),
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "ignored" => Ok(Self::Ignored),
            other => Err(format!("unknown review status '{}'", other)),
        }
    }
}

/// A finding about one job.
///
/// `id` is `None` until the record store has inserted it. `deleted_at` marks
/// an archived (soft-deleted) record; at most one record per job has it
/// unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Option<i64>,
    pub job_id: i64,
    pub job_name: String,
    pub pod_name: String,
    pub namespace: String,
    pub user_id: i64,
    pub user_name: String,
    pub phase1_score: i32,
    pub phase2_score: i32,
    pub phase1_reason: String,
    pub phase2_reason: String,
    pub model_version: String,
    /// Full resolved command line of the suspect process.
    pub command: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub script_content: String,
    /// Serialized [`crate::metrics::GpuMetrics`]; opaque to the store.
    pub metrics_snapshot: String,
    pub review_status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AnalysisRecord {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn phase2_evaluated(&self) -> bool {
        self.phase2_score != PHASE2_NOT_EVALUATED
    }
}
