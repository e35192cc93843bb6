//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            namespace TEXT NOT NULL,
            user_id INTEGER NOT NULL,
            user_name TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            locked_until TEXT,
            running_since TEXT,
            resources_json TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

        CREATE TABLE IF NOT EXISTS gpu_analyses (
            id INTEGER PRIMARY KEY,
            job_id INTEGER NOT NULL,
            job_name TEXT NOT NULL,
            pod_name TEXT NOT NULL,
            namespace TEXT NOT NULL,
            user_id INTEGER NOT NULL,
            user_name TEXT NOT NULL,
            phase1_score INTEGER NOT NULL,
            phase2_score INTEGER NOT NULL DEFAULT -1,
            phase1_reason TEXT NOT NULL DEFAULT '',
            phase2_reason TEXT NOT NULL DEFAULT '',
            model_version TEXT NOT NULL DEFAULT '',
            command TEXT NOT NULL DEFAULT '',
            script_content TEXT NOT NULL DEFAULT '',
            metrics_snapshot TEXT NOT NULL DEFAULT '{}',
            review_status INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            deleted_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_gpu_analyses_job ON gpu_analyses(job_id);
        CREATE INDEX IF NOT EXISTS idx_gpu_analyses_deleted ON gpu_analyses(deleted_at);
        CREATE INDEX IF NOT EXISTS idx_gpu_analyses_created ON gpu_analyses(created_at);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (1)",
        [],
    )?;

    Ok(())
}
