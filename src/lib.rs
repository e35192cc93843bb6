//! gpuwarden -- GPU-abuse patrol for cluster control planes.
//!
//! Finds running GPU jobs, inspects their containers, scores the main
//! process with a two-phase LLM review, and keeps one live finding per job
//! for human review.

pub mod analysis;
pub mod config;
pub mod inspect;
pub mod jobs;
pub mod llm;
pub mod metrics;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::analysis::Collaborators;
use crate::analysis::queue::QueueWorker;
use crate::analysis::PatrolService;
use crate::config::Config;
use crate::storage::Pool;

/// Open the configured database.
pub fn open_database(config: &Config) -> Result<Pool> {
    let path = config.database.path.to_string_lossy();
    tracing::info!(db_path = %path, "Initializing database");
    storage::open_pool(&path).with_context(|| format!("Failed to open database {}", path))
}

/// Build the production collaborators: SQLite stores, kubectl, Prometheus
/// and (when enabled) the OpenAI-compatible LLM client.
pub fn collaborators(config: &Config, pool: Pool) -> Result<Collaborators> {
    let llm: Option<Arc<dyn llm::LlmClient>> = match config.llm.readiness_problem() {
        Some(problem) => {
            tracing::warn!(reason = problem, "GPU analysis unavailable");
            None
        }
        None => Some(Arc::new(llm::OpenAiClient::new(&config.llm)?)),
    };

    Ok(Collaborators {
        jobs: Arc::new(jobs::SqliteJobStore::new(pool.clone())),
        pods: Arc::new(inspect::KubectlPodProvider::new(&config.kubernetes)),
        metrics: Arc::new(metrics::PrometheusProvider::new(&config.prometheus)?),
        llm,
        records: Arc::new(storage::SqliteRecordStore::new(pool)),
    })
}

/// Build the patrol service over the production collaborators. The worker
/// is returned unstarted.
pub fn build_service(config: &Config) -> Result<(PatrolService, QueueWorker)> {
    let pool = open_database(config)?;
    Ok(PatrolService::new(collaborators(config, pool)?, config))
}

/// Run the daemon: analysis worker plus the cron-driven patrol, until
/// Ctrl-C.
pub async fn serve(config: Config) -> Result<()> {
    let pool = open_database(&config)?;
    let (service, worker) = PatrolService::start(collaborators(&config, pool)?, &config);

    if config.patrol.enabled {
        let schedule = scheduler::PatrolSchedule::parse(&config.patrol.cron)?;
        tokio::spawn(scheduler::run_patrol_loop(schedule, service.clone()));
    } else {
        tracing::info!("Periodic patrol disabled");
    }

    tracing::info!("Gpuwarden running");
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown requested");
        }
        res = worker => {
            res.context("Analysis worker terminated")?;
            tracing::warn!("Analysis worker exited");
        }
    }
    Ok(())
}
