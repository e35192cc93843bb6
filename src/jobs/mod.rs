//! Jobs as seen by the patrol: a read-only view of the control plane's
//! job table plus the eligibility predicate.

pub mod eligibility;
pub mod store;

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::eligibility::EligibilityPolicy;
pub use self::store::SqliteJobStore;

/// Lifecycle state of a job as recorded by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Deleted,
    Other(String),
}

impl JobStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Completed" => Self::Completed,
            "Failed" => Self::Failed,
            "Deleted" => Self::Deleted,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Deleted => "Deleted",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job submitted to the cluster, joined with its owner's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub namespace: String,
    pub user_id: i64,
    pub user_name: String,
    pub status: JobStatus,
    /// Admin lock; the job is exempt from patrol until this passes.
    pub locked_until: Option<DateTime<Utc>>,
    pub running_since: Option<DateTime<Utc>>,
    /// Declared resource quantities, e.g. `nvidia.com/gpu -> "2"`.
    pub resources: BTreeMap<String, String>,
}

/// Read access to the control plane's jobs.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Look a job up by its unique name.
    async fn get(&self, name: &str) -> Result<Option<Job>>;

    /// Fetch every job whose id is in `ids`. Unknown ids are skipped.
    async fn get_by_ids(&self, ids: &[i64]) -> Result<Vec<Job>>;

    /// All jobs currently in the `Running` state.
    async fn list_running(&self) -> Result<Vec<Job>>;
}
