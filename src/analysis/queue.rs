//! Bounded analysis queue with per-job deduplication, and its single
//! consumer.
//!
//! A job name is in the [`DedupTracker`] from the moment it is accepted
//! until its task finishes, whatever the outcome. Producers never block: a
//! full queue rejects the job and the next patrol picks it up again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, info, warn};

use super::AnalysisError;
use crate::jobs::{EligibilityPolicy, Job};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is full, only {enqueued} jobs were enqueued")]
    Full { enqueued: usize },
    #[error("analysis worker has stopped")]
    Closed,
}

/// Names of jobs queued or in flight.
#[derive(Debug, Clone, Default)]
pub struct DedupTracker {
    names: Arc<Mutex<HashSet<String>>>,
}

impl DedupTracker {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.names.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `false` if `name` was already tracked.
    pub fn insert(&self, name: &str) -> bool {
        self.lock().insert(name.to_string())
    }

    pub fn remove(&self, name: &str) {
        self.lock().remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the worker does with each dequeued job.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn process(&self, job: Job) -> Result<(), AnalysisError>;

    /// Runs after every job, whatever its outcome.
    async fn after_job(&self) {}
}

/// Producer side. Cheap to clone; every clone feeds the same worker.
#[derive(Clone)]
pub struct AnalysisQueue {
    tx: mpsc::Sender<Job>,
    tracker: DedupTracker,
    policy: EligibilityPolicy,
}

/// Consumer side, driven by [`QueueWorker::run`].
pub struct QueueWorker {
    rx: mpsc::Receiver<Job>,
    tracker: DedupTracker,
    interval: Duration,
}

impl AnalysisQueue {
    /// A queue holding at most `capacity` jobs, whose worker pauses
    /// `interval` between jobs.
    pub fn new(capacity: usize, interval: Duration, policy: EligibilityPolicy) -> (Self, QueueWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let tracker = DedupTracker::default();
        (
            Self {
                tx,
                tracker: tracker.clone(),
                policy,
            },
            QueueWorker { rx, tracker, interval },
        )
    }

    pub fn tracker(&self) -> &DedupTracker {
        &self.tracker
    }

    /// Queue one job.
    ///
    /// `Ok(false)` when the job is ineligible or already queued/in flight.
    pub fn enqueue(&self, job: &Job) -> Result<bool, QueueError> {
        if !self.policy.is_eligible(job, chrono::Utc::now()) {
            return Ok(false);
        }
        if !self.tracker.insert(&job.name) {
            info!(job = %job.name, "Already queued or in progress, skipping");
            return Ok(false);
        }
        match self.tx.try_send(job.clone()) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                self.tracker.remove(&job.name);
                Err(QueueError::Full { enqueued: 0 })
            }
            Err(TrySendError::Closed(_)) => {
                self.tracker.remove(&job.name);
                Err(QueueError::Closed)
            }
        }
    }

    /// Queue jobs in order, stopping at the first one the queue rejects.
    ///
    /// Returns how many were newly queued; on a full queue the error
    /// carries that count instead.
    pub fn enqueue_batch(&self, jobs: &[Job]) -> Result<usize, QueueError> {
        let mut count = 0;
        for job in jobs {
            match self.enqueue(job) {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(QueueError::Full { .. }) => {
                    warn!(enqueued = count, "Analysis queue is full, stopped enqueuing");
                    return Err(QueueError::Full { enqueued: count });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }
}

impl QueueWorker {
    /// Drain the queue until every producer is gone.
    ///
    /// Each job runs in its own task so that a panic is contained there;
    /// the loop logs it and moves on.
    pub async fn run(mut self, handler: Arc<dyn JobHandler>) {
        info!("GPU analysis worker started");
        while let Some(job) = self.rx.recv().await {
            let name = job.name.clone();
            info!(job = %name, "Worker picked up job");

            let task_handler = handler.clone();
            let outcome = tokio::spawn(async move { task_handler.process(job).await }).await;
            self.tracker.remove(&name);

            match outcome {
                Ok(Ok(())) => info!(job = %name, "Analysis completed"),
                Ok(Err(e)) => error!(job = %name, error = %e, "Analysis failed"),
                Err(e) if e.is_panic() => error!(job = %name, "Recovered from panic during analysis"),
                Err(e) => error!(job = %name, error = %e, "Analysis task was cancelled"),
            }

            handler.after_job().await;
            tokio::time::sleep(self.interval).await;
        }
        info!("GPU analysis worker stopped");
    }
}
