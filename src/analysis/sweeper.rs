//! Retention passes over stored findings.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::jobs::{EligibilityPolicy, JobStore};
use crate::storage::RecordStore;

#[derive(Clone)]
pub struct Sweeper {
    jobs: Arc<dyn JobStore>,
    records: Arc<dyn RecordStore>,
    policy: EligibilityPolicy,
    retention: chrono::Duration,
}

impl Sweeper {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        records: Arc<dyn RecordStore>,
        policy: EligibilityPolicy,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            jobs,
            records,
            policy,
            retention,
        }
    }

    /// Hard-delete live findings whose job no longer qualifies for analysis
    /// (finished, lost its GPUs, got locked, or vanished).
    pub async fn sweep_stale(&self) -> Result<usize> {
        self.sweep_stale_at(Utc::now()).await
    }

    pub async fn sweep_stale_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let live = self.records.list_live()?;
        if live.is_empty() {
            return Ok(0);
        }

        let mut job_ids: Vec<i64> = live.iter().map(|r| r.job_id).collect();
        job_ids.sort_unstable();
        job_ids.dedup();

        let still_eligible: HashSet<i64> = self
            .jobs
            .get_by_ids(&job_ids)
            .await?
            .iter()
            .filter(|j| self.policy.is_eligible(j, now))
            .map(|j| j.id)
            .collect();

        let stale: Vec<i64> = live
            .iter()
            .filter(|r| !still_eligible.contains(&r.job_id))
            .filter_map(|r| r.id)
            .collect();
        if stale.is_empty() {
            debug!("No stale analysis records");
            return Ok(0);
        }

        let n = self.records.delete_ids(&stale)?;
        info!(deleted = n, "Removed stale analysis records");
        Ok(n)
    }

    /// Hard-delete reviewed findings older than the retention window.
    /// Pending findings are kept however old they are.
    pub fn sweep_overtime(&self) -> Result<usize> {
        self.sweep_overtime_at(Utc::now())
    }

    pub fn sweep_overtime_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let n = self.records.delete_reviewed_before(now - self.retention)?;
        if n > 0 {
            info!(deleted = n, "Removed overtime analysis records");
        }
        Ok(n)
    }
}
