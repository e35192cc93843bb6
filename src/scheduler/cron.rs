use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

/// When the periodic patrol fires. Six-field cron (seconds first).
#[derive(Debug, Clone)]
pub struct PatrolSchedule {
    expr: String,
    schedule: CronSchedule,
}

impl PatrolSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let schedule = CronSchedule::from_str(expr)
            .map_err(|e| anyhow!("Invalid cron expression '{}': {}", expr, e))?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&t).next()
    }

    /// Fire times in `(from, from + hours]`.
    /// This is strictly a dry-run preview, not the execution loop.
    pub fn preview(&self, from: DateTime<Utc>, hours: u64) -> Vec<DateTime<Utc>> {
        let end = from + chrono::Duration::hours(hours as i64);
        self.schedule.after(&from).take_while(|t| *t <= end).collect()
    }
}
