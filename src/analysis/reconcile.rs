//! Deciding how a fresh finding supersedes, archives, or defers to the
//! findings already stored for the same job.
//!
//! Planning is pure; [`crate::storage::RecordStore::apply_plan`] executes a
//! plan in a single transaction (hard-deletes, soft-delete, restore,
//! create, in that order).
//!
//! | latest vs. new         | latest reviewed? | outcome                          |
//! |------------------------|------------------|----------------------------------|
//! | same command           | yes              | keep latest (restore), drop new  |
//! | same command           | no               | hard-delete latest, create new   |
//! | different command      | either           | archive latest, create new       |
//!
//! Anything older than the latest record is always hard-deleted, so at
//! most one historical record survives per job.

use super::record::AnalysisRecord;

/// The storage mutations reconciling one new finding.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationPlan {
    pub hard_delete: Vec<i64>,
    pub soft_delete: Vec<i64>,
    /// Previously stored record kept as the job's live finding.
    pub restore: Option<AnalysisRecord>,
    pub create: bool,
    /// The record the caller ends up with: the new finding when `create`,
    /// otherwise the restored one.
    pub record: AnalysisRecord,
}

/// Plan the reconciliation of `new` against `existing`, which must hold
/// every stored record of the job (archived ones included), newest first.
pub fn plan(existing: &[AnalysisRecord], new: AnalysisRecord) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan {
        hard_delete: Vec::new(),
        soft_delete: Vec::new(),
        restore: None,
        create: true,
        record: new,
    };

    let Some((latest, older)) = existing.split_first() else {
        return plan;
    };

    plan.hard_delete.extend(older.iter().filter_map(|r| r.id));

    let Some(latest_id) = latest.id else {
        return plan;
    };

    if latest.command == plan.record.command {
        if latest.review_status.is_reviewed() {
            plan.create = false;
            plan.restore = Some(latest.clone());
            plan.record = latest.clone();
        } else {
            plan.hard_delete.push(latest_id);
        }
    } else {
        plan.soft_delete.push(latest_id);
    }

    plan
}
