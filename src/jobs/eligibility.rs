//! Which jobs qualify for GPU-abuse analysis.
//!
//! The same predicate gates enqueueing and judges whether an existing
//! finding has gone stale, so it must stay free of side effects.

use chrono::{DateTime, Duration, Utc};

use super::{Job, JobStatus};
use crate::config::AnalysisConfig;

#[derive(Debug, Clone)]
pub struct EligibilityPolicy {
    pub min_age: Duration,
    /// Lowercase substrings; a resource whose name contains one of them is
    /// an accelerator claim.
    pub accelerator_patterns: Vec<String>,
}

impl EligibilityPolicy {
    pub fn from_config(cfg: &AnalysisConfig) -> Self {
        Self {
            min_age: cfg.min_job_age(),
            accelerator_patterns: cfg
                .accelerator_patterns
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
        }
    }

    /// True iff the job is running, not locked, old enough, and claims a
    /// non-zero quantity of an accelerator resource.
    pub fn is_eligible(&self, job: &Job, now: DateTime<Utc>) -> bool {
        if job.status != JobStatus::Running {
            return false;
        }
        if let Some(until) = job.locked_until {
            if until > now {
                return false;
            }
        }
        match job.running_since {
            Some(since) if now - since >= self.min_age => {}
            _ => return false,
        }
        self.claims_accelerator(job)
    }

    fn claims_accelerator(&self, job: &Job) -> bool {
        job.resources.iter().any(|(name, quantity)| {
            let name = name.to_ascii_lowercase();
            self.accelerator_patterns.iter().any(|p| name.contains(p.as_str()))
                && quantity_is_positive(quantity)
        })
    }
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

/// Whether a Kubernetes-style quantity (`"2"`, `"500m"`, `"1Ki"`) is > 0.
/// Unparseable quantities count as zero.
fn quantity_is_positive(quantity: &str) -> bool {
    let q = quantity.trim();
    let end = q
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(q.len());
    q[..end].parse::<f64>().map(|v| v > 0.0).unwrap_or(false)
}
