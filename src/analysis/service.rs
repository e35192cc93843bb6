//! Entry points used by the CLI and the patrol loop.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::pipeline::{Analyzer, Collaborators};
use super::queue::{AnalysisQueue, JobHandler, QueueWorker};
use super::record::AnalysisRecord;
use super::sweeper::Sweeper;
use super::AnalysisError;
use crate::config::Config;
use crate::jobs::{Job, JobStore};

pub struct PatrolService {
    analyzer: Arc<Analyzer>,
    queue: AnalysisQueue,
    sweeper: Sweeper,
    jobs: Arc<dyn JobStore>,
}

/// Worker-side glue: analyze each dequeued job, sweep stale findings after.
struct QueuedAnalysis {
    analyzer: Arc<Analyzer>,
    sweeper: Sweeper,
}

#[async_trait::async_trait]
impl JobHandler for QueuedAnalysis {
    async fn process(&self, job: Job) -> Result<(), AnalysisError> {
        self.analyzer.analyze_job(&job.name).await.map(|_| ())
    }

    async fn after_job(&self) {
        if let Err(e) = self.sweeper.sweep_stale().await {
            warn!(error = %e, "Stale sweep failed");
        }
    }
}

impl PatrolService {
    /// Build the service and the worker that must be run to drain its queue.
    pub fn new(deps: Collaborators, config: &Config) -> (Self, QueueWorker) {
        let jobs = deps.jobs.clone();
        let records = deps.records.clone();
        let analyzer = Arc::new(Analyzer::new(deps, config));
        let policy = analyzer.policy().clone();

        let (queue, worker) = AnalysisQueue::new(
            config.patrol.queue_capacity,
            config.patrol.worker_interval(),
            policy.clone(),
        );
        let sweeper = Sweeper::new(jobs.clone(), records, policy, config.patrol.retention());

        (
            Self {
                analyzer,
                queue,
                sweeper,
                jobs,
            },
            worker,
        )
    }

    /// Build the service and spawn its worker on the current runtime.
    pub fn start(deps: Collaborators, config: &Config) -> (Arc<Self>, JoinHandle<()>) {
        let (service, worker) = Self::new(deps, config);
        let handle = tokio::spawn(worker.run(service.job_handler()));
        (Arc::new(service), handle)
    }

    pub fn job_handler(&self) -> Arc<dyn JobHandler> {
        Arc::new(QueuedAnalysis {
            analyzer: self.analyzer.clone(),
            sweeper: self.sweeper.clone(),
        })
    }

    pub fn queue(&self) -> &AnalysisQueue {
        &self.queue
    }

    pub fn sweeper(&self) -> &Sweeper {
        &self.sweeper
    }

    pub async fn analyze_pod(&self, namespace: &str, pod: &str) -> Result<AnalysisRecord, AnalysisError> {
        self.analyzer.analyze_pod(namespace, pod).await
    }

    pub async fn analyze_job(&self, job_name: &str) -> Result<AnalysisRecord, AnalysisError> {
        self.analyzer.analyze_job(job_name).await
    }

    /// Queue every eligible running job.
    ///
    /// Returns the number queued. When the queue fills mid-scan the error is
    /// [`AnalysisError::Queue`] carrying the partial count.
    pub async fn trigger_all_eligible(&self) -> Result<usize, AnalysisError> {
        self.analyzer.ensure_ready()?;

        let sweeper = self.sweeper.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = sweeper.sweep_overtime() {
                warn!(error = %e, "Overtime sweep failed");
            }
        });

        let running = self.jobs.list_running().await.map_err(AnalysisError::Persistence)?;
        info!(count = running.len(), "Running jobs found for analysis");
        if running.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let policy = self.analyzer.policy();
        let eligible: Vec<Job> = running.into_iter().filter(|j| policy.is_eligible(j, now)).collect();
        if eligible.is_empty() {
            info!("Running jobs found, but none qualify for GPU analysis");
            let sweeper = self.sweeper.clone();
            tokio::spawn(async move {
                if let Err(e) = sweeper.sweep_stale().await {
                    warn!(error = %e, "Stale sweep failed");
                }
            });
            return Ok(0);
        }

        let count = self.queue.enqueue_batch(&eligible)?;
        info!(count, "Enqueued jobs for asynchronous GPU analysis");
        Ok(count)
    }

    /// One scheduled patrol pass. Failures are logged.
    pub async fn run_patrol_cycle(&self) {
        let cycle = uuid::Uuid::new_v4();
        info!(%cycle, "Starting GPU abuse patrol");
        match self.trigger_all_eligible().await {
            Ok(n) => info!(%cycle, enqueued = n, "Patrol finished"),
            Err(e) => warn!(%cycle, error = %e, "Patrol incomplete"),
        }
    }
}
