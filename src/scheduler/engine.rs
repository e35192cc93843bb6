use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::analysis::PatrolService;
use crate::scheduler::PatrolSchedule;

/// Main patrol loop: sleep until the next cron fire time, then run one
/// patrol cycle. Cycles run inline, so a slow one delays rather than
/// overlaps the next.
pub async fn run_patrol_loop(schedule: PatrolSchedule, service: Arc<PatrolService>) {
    info!(cron = %schedule.expr(), "Patrol scheduler started");

    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            warn!(cron = %schedule.expr(), "No upcoming patrol times, scheduler exiting");
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(next = %next.to_rfc3339(), "Next patrol scheduled");

        tokio::time::sleep(wait).await;
        service.run_patrol_cycle().await;
    }
}
