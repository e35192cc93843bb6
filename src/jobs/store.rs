//! [`JobStore`] over the control plane's `jobs` table.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Row};

use super::{Job, JobStatus, JobStore};
use crate::storage::{fmt_ts, parse_opt_ts, Pool};

const COLUMNS: &str =
    "id, name, namespace, user_id, user_name, status, locked_until, running_since, resources_json";

#[derive(Clone)]
pub struct SqliteJobStore {
    pool: Pool,
}

impl SqliteJobStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert or replace a job row. The control plane owns this table;
    /// this exists for seeding and tests.
    pub fn upsert(&self, job: &Job) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO jobs (id, name, namespace, user_id, user_name, status,
                               locked_until, running_since, resources_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                namespace = excluded.namespace,
                user_id = excluded.user_id,
                user_name = excluded.user_name,
                status = excluded.status,
                locked_until = excluded.locked_until,
                running_since = excluded.running_since,
                resources_json = excluded.resources_json",
            params![
                job.id,
                job.name,
                job.namespace,
                job.user_id,
                job.user_name,
                job.status.as_str(),
                job.locked_until.as_ref().map(fmt_ts),
                job.running_since.as_ref().map(fmt_ts),
                serde_json::to_string(&job.resources)?,
            ],
        )
        .with_context(|| format!("Failed to upsert job '{}'", job.name))?;
        Ok(())
    }

    fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Job>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, job_from_row)?;

        let mut jobs = Vec::new();
        for r in rows {
            jobs.push(r?);
        }
        Ok(jobs)
    }
}

#[async_trait::async_trait]
impl JobStore for SqliteJobStore {
    async fn get(&self, name: &str) -> Result<Option<Job>> {
        Ok(self
            .query(&format!("SELECT {COLUMNS} FROM jobs WHERE name = ?1"), &[&name])?
            .into_iter()
            .next())
    }

    async fn get_by_ids(&self, ids: &[i64]) -> Result<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs WHERE id IN ({})",
            vec!["?"; ids.len()].join(",")
        );
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), job_from_row)?;

        let mut jobs = Vec::new();
        for r in rows {
            jobs.push(r?);
        }
        Ok(jobs)
    }

    async fn list_running(&self) -> Result<Vec<Job>> {
        self.query(
            &format!("SELECT {COLUMNS} FROM jobs WHERE status = ?1 ORDER BY id"),
            &[&JobStatus::Running.as_str()],
        )
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(5)?;
    let resources_json: String = row.get(8)?;
    let resources: BTreeMap<String, String> = serde_json::from_str(&resources_json)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        namespace: row.get(2)?,
        user_id: row.get(3)?,
        user_name: row.get(4)?,
        status: JobStatus::parse(&status),
        locked_until: parse_opt_ts(6, row.get(6)?)?,
        running_since: parse_opt_ts(7, row.get(7)?)?,
        resources,
    })
}
