//! GPU-abuse analysis: the staged LLM pipeline, reconciliation of its
//! findings, the dedup work queue, and the retention sweeper.

pub mod pipeline;
pub mod queue;
pub mod reconcile;
pub mod record;
pub mod service;
pub mod sweeper;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::inspect::script::ScriptError;
use crate::llm::LlmError;

pub use self::pipeline::{Analyzer, Collaborators};
pub use self::queue::{AnalysisQueue, DedupTracker, JobHandler, QueueError, QueueWorker};
pub use self::record::{AnalysisRecord, ReviewStatus, PHASE2_NOT_EVALUATED};
pub use self::service::PatrolService;
pub use self::sweeper::Sweeper;

/// Why an analysis request failed.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Feature disabled or LLM endpoint unconfigured. Raised before any
    /// cluster access.
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    NotFound(String),

    #[error("job '{name}' is not eligible for GPU analysis (status: {status})")]
    NotEligible { name: String, status: String },

    #[error("pod error: {0:#}")]
    Pod(anyhow::Error),

    #[error("LLM phase 1 call failed for pod {pod}: {source}")]
    Llm {
        pod: String,
        #[source]
        source: LlmError,
    },

    #[error("storage error: {0:#}")]
    Persistence(anyhow::Error),

    /// Phase 2 could not locate or read the script. Logged; the phase 1
    /// record is still persisted.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// The queue rejected part of a batch; carries the accepted count.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Models answer "unknown" with `null` as often as by omitting the key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Phase 1 answer: the suspect process and a coarse score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase1Verdict {
    /// `<= 0` when the model could not tell.
    #[serde(default, deserialize_with = "null_as_default")]
    pub pid: i64,
    pub score: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reason: String,
}

/// Phase 2 answer: the score after reading the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase2Verdict {
    pub score: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reason: String,
}
