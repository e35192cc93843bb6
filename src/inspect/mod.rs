//! Reaching into running workloads: pod lookup and command execution in a
//! container, plus the process-table and script helpers built on top.

pub mod kubectl;
pub mod process;
pub mod script;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jobs::Job;

pub use self::kubectl::KubectlPodProvider;
pub use self::process::{fallback_pid, ProcessSample};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch exec: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("command `{command}` exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    /// Exit status was fine but something was written to stderr.
    #[error("command `{command}` wrote to stderr: {stderr}")]
    Stderr { command: String, stderr: String },
}

/// The parts of a pod the analysis needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub phase: String,
    /// Container names in spec order; the first is the primary one.
    pub containers: Vec<String>,
}

impl Pod {
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }

    pub fn primary_container(&self) -> Option<&str> {
        self.containers.first().map(String::as_str)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// Cluster access for pods.
#[async_trait::async_trait]
pub trait PodProvider: Send + Sync {
    /// `Ok(None)` when the pod does not exist.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// First pod of `job` in phase Running, if any.
    async fn running_pod_for_job(&self, job: &Job) -> Result<Option<Pod>>;

    /// Run `argv` in `container` and return its stdout.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        argv: &[String],
    ) -> Result<String, ExecError>;
}

/// One container of one pod, bound to a provider.
#[derive(Clone)]
pub struct ContainerHandle {
    provider: Arc<dyn PodProvider>,
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl ContainerHandle {
    pub fn new(provider: Arc<dyn PodProvider>, pod: &Pod, container: &str) -> Self {
        Self {
            provider,
            namespace: pod.namespace.clone(),
            pod: pod.name.clone(),
            container: container.to_string(),
        }
    }

    pub async fn exec<S: AsRef<str>>(&self, argv: &[S]) -> Result<String, ExecError> {
        let argv: Vec<String> = argv.iter().map(|a| a.as_ref().to_string()).collect();
        self.provider
            .exec(&self.namespace, &self.pod, &self.container, &argv)
            .await
    }

    /// `sh -c <script>`
    pub async fn shell(&self, script: &str) -> Result<String, ExecError> {
        self.exec(&["sh", "-c", script]).await
    }
}
