//! Persistence of [`AnalysisRecord`]s.
//!
//! Soft deletion is an explicit nullable `deleted_at` column. Queries come
//! in two flavours: live-only (`deleted_at IS NULL`) and include-archived.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Row, Transaction};

use super::{fmt_ts, parse_opt_ts, parse_ts, Pool};
use crate::analysis::reconcile::ReconciliationPlan;
use crate::analysis::record::{AnalysisRecord, ReviewStatus};

/// Transactional storage of analysis records.
pub trait RecordStore: Send + Sync {
    /// Every record of a job, archived ones included, newest first.
    fn list_for_job(&self, job_id: i64) -> Result<Vec<AnalysisRecord>>;

    /// Every live record, in insertion order.
    fn list_live(&self) -> Result<Vec<AnalysisRecord>>;

    /// Live records for the admin listing: highest phase 2 score first,
    /// then newest first.
    fn list_live_ranked(&self) -> Result<Vec<AnalysisRecord>>;

    fn get(&self, id: i64) -> Result<Option<AnalysisRecord>>;

    /// Apply a reconciliation plan atomically and return the record the
    /// job ends up with. Nothing is changed if any step fails.
    fn apply_plan(&self, plan: &ReconciliationPlan) -> Result<AnalysisRecord>;

    /// Hard-delete the given ids. Returns the number of rows removed.
    fn delete_ids(&self, ids: &[i64]) -> Result<usize>;

    /// Hard-delete reviewed records created before `cutoff`.
    fn delete_reviewed_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Record an admin decision. Returns `false` if no such record exists.
    fn set_review_status(&self, id: i64, status: ReviewStatus) -> Result<bool>;
}

const COLUMNS: &str = "id, job_id, job_name, pod_name, namespace, user_id, user_name, \
     phase1_score, phase2_score, phase1_reason, phase2_reason, model_version, \
     command, script_content, metrics_snapshot, review_status, created_at, deleted_at";

/// SQLite-backed [`RecordStore`].
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: Pool,
}

impl SqliteRecordStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<AnalysisRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, record_from_row)?;

        let mut records = Vec::new();
        for r in rows {
            records.push(r?);
        }
        Ok(records)
    }
}

impl RecordStore for SqliteRecordStore {
    fn list_for_job(&self, job_id: i64) -> Result<Vec<AnalysisRecord>> {
        self.query(
            &format!("SELECT {COLUMNS} FROM gpu_analyses WHERE job_id = ?1 ORDER BY id DESC"),
            &[&job_id],
        )
    }

    fn list_live(&self) -> Result<Vec<AnalysisRecord>> {
        self.query(
            &format!("SELECT {COLUMNS} FROM gpu_analyses WHERE deleted_at IS NULL ORDER BY id"),
            &[],
        )
    }

    fn list_live_ranked(&self) -> Result<Vec<AnalysisRecord>> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM gpu_analyses WHERE deleted_at IS NULL
                 ORDER BY phase2_score DESC, created_at DESC, id DESC"
            ),
            &[],
        )
    }

    fn get(&self, id: i64) -> Result<Option<AnalysisRecord>> {
        Ok(self
            .query(&format!("SELECT {COLUMNS} FROM gpu_analyses WHERE id = ?1"), &[&id])?
            .into_iter()
            .next())
    }

    fn apply_plan(&self, plan: &ReconciliationPlan) -> Result<AnalysisRecord> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        hard_delete(&tx, &plan.hard_delete).context("hard-delete of superseded records failed")?;
        soft_delete(&tx, &plan.soft_delete, Utc::now())
            .context("archiving of previous record failed")?;

        let mut record = plan.record.clone();
        if let Some(restore) = &plan.restore {
            if restore.deleted_at.is_some() {
                let id = restore.id.context("record to restore has no id")?;
                tx.execute(
                    "UPDATE gpu_analyses SET deleted_at = NULL WHERE id = ?1",
                    params![id],
                )
                .context("restore of archived record failed")?;
            }
            record.deleted_at = None;
        }

        if plan.create {
            record.id = Some(insert(&tx, &record).context("insert of new record failed")?);
            record.deleted_at = None;
        }

        tx.commit()?;
        Ok(record)
    }

    fn delete_ids(&self, ids: &[i64]) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let n = hard_delete(&tx, ids)?;
        tx.commit()?;
        Ok(n)
    }

    fn delete_reviewed_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.pool.get()?;
        let n = conn.execute(
            "DELETE FROM gpu_analyses WHERE created_at < ?1 AND review_status != ?2",
            params![fmt_ts(&cutoff), ReviewStatus::Pending.as_i64()],
        )?;
        Ok(n)
    }

    fn set_review_status(&self, id: i64, status: ReviewStatus) -> Result<bool> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE gpu_analyses SET review_status = ?1 WHERE id = ?2",
            params![status.as_i64(), id],
        )?;
        Ok(changed > 0)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn hard_delete(tx: &Transaction<'_>, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = format!("DELETE FROM gpu_analyses WHERE id IN ({})", placeholders(ids.len()));
    Ok(tx.execute(&sql, params_from_iter(ids.iter()))?)
}

fn soft_delete(tx: &Transaction<'_>, ids: &[i64], at: DateTime<Utc>) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE gpu_analyses SET deleted_at = ? WHERE deleted_at IS NULL AND id IN ({})",
        placeholders(ids.len())
    );
    let at = fmt_ts(&at);
    let args = std::iter::once(&at as &dyn rusqlite::ToSql)
        .chain(ids.iter().map(|id| id as &dyn rusqlite::ToSql));
    Ok(tx.execute(&sql, params_from_iter(args))?)
}

fn insert(tx: &Transaction<'_>, r: &AnalysisRecord) -> Result<i64> {
    tx.execute(
        "INSERT INTO gpu_analyses (
            job_id, job_name, pod_name, namespace, user_id, user_name,
            phase1_score, phase2_score, phase1_reason, phase2_reason, model_version,
            command, script_content, metrics_snapshot, review_status, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            r.job_id,
            r.job_name,
            r.pod_name,
            r.namespace,
            r.user_id,
            r.user_name,
            r.phase1_score,
            r.phase2_score,
            r.phase1_reason,
            r.phase2_reason,
            r.model_version,
            r.command,
            r.script_content,
            r.metrics_snapshot,
            r.review_status.as_i64(),
            fmt_ts(&r.created_at),
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AnalysisRecord> {
    let status_raw: i64 = row.get(15)?;
    let review_status = ReviewStatus::from_i64(status_raw).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(15, status_raw)
    })?;

    Ok(AnalysisRecord {
        id: Some(row.get(0)?),
        job_id: row.get(1)?,
        job_name: row.get(2)?,
        pod_name: row.get(3)?,
        namespace: row.get(4)?,
        user_id: row.get(5)?,
        user_name: row.get(6)?,
        phase1_score: row.get(7)?,
        phase2_score: row.get(8)?,
        phase1_reason: row.get(9)?,
        phase2_reason: row.get(10)?,
        model_version: row.get(11)?,
        command: row.get(12)?,
        script_content: row.get(13)?,
        metrics_snapshot: row.get(14)?,
        review_status,
        created_at: parse_ts(16, &row.get::<_, String>(16)?)?,
        deleted_at: parse_opt_ts(17, row.get(17)?)?,
    })
}
