//! [`PodProvider`] backed by the `kubectl` binary.

use std::collections::BTreeMap;
use std::process::Output;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{ExecError, Pod, PodProvider};
use crate::config::KubernetesConfig;
use crate::jobs::Job;

pub struct KubectlPodProvider {
    kubectl: String,
    kubeconfig: Option<std::path::PathBuf>,
    job_label: String,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodObject>,
}

#[derive(Debug, Deserialize)]
struct PodObject {
    metadata: PodMeta,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMeta {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<ContainerSpec>,
}

#[derive(Debug, Deserialize)]
struct ContainerSpec {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: String,
}

impl From<PodObject> for Pod {
    fn from(p: PodObject) -> Self {
        Pod {
            name: p.metadata.name,
            namespace: p.metadata.namespace,
            labels: p.metadata.labels,
            phase: p.status.phase,
            containers: p.spec.containers.into_iter().map(|c| c.name).collect(),
        }
    }
}

impl KubectlPodProvider {
    pub fn new(cfg: &KubernetesConfig) -> Self {
        Self {
            kubectl: cfg.kubectl_path.clone(),
            kubeconfig: cfg.kubeconfig.clone(),
            job_label: cfg.job_label.clone(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.kubectl);
        if let Some(path) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(path);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn get_json(&self, args: &[&str]) -> Result<Output> {
        debug!(?args, "Running kubectl");
        self.command()
            .args(args)
            .arg("-o")
            .arg("json")
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.kubectl))
    }

    /// Arguments for `kubectl exec` without the leading binary.
    pub fn exec_args(namespace: &str, pod: &str, container: &str, argv: &[String]) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            pod.to_string(),
            "-c".to_string(),
            container.to_string(),
            "--".to_string(),
        ];
        args.extend(argv.iter().cloned());
        args
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.contains("not found")
}

/// First pod in phase Running.
fn first_running(list: PodList) -> Option<Pod> {
    list.items
        .into_iter()
        .map(Pod::from)
        .find(|p| p.is_running())
}

#[async_trait::async_trait]
impl PodProvider for KubectlPodProvider {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let output = self.get_json(&["get", "pod", "-n", namespace, name]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Ok(None);
            }
            bail!("kubectl get pod {}/{} failed: {}", namespace, name, stderr.trim());
        }
        let obj: PodObject =
            serde_json::from_slice(&output.stdout).context("Malformed pod JSON from kubectl")?;
        Ok(Some(obj.into()))
    }

    async fn running_pod_for_job(&self, job: &Job) -> Result<Option<Pod>> {
        let selector = format!("{}={}", self.job_label, job.name);
        let output = self
            .get_json(&["get", "pods", "-n", &job.namespace, "-l", &selector])
            .await?;
        if !output.status.success() {
            bail!(
                "kubectl list pods for job '{}' failed: {}",
                job.name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let list: PodList =
            serde_json::from_slice(&output.stdout).context("Malformed pod list JSON from kubectl")?;
        Ok(first_running(list))
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        argv: &[String],
    ) -> Result<String, ExecError> {
        let args = Self::exec_args(namespace, pod, container, argv);
        debug!(%pod, %container, command = %argv.join(" "), "Exec in container");

        let output = self.command().args(&args).output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ExecError::Failed {
                command: argv.join(" "),
                code: output.status.code(),
                stderr,
            });
        }
        if !stderr.trim().is_empty() {
            return Err(ExecError::Stderr {
                command: argv.join(" "),
                stderr,
            });
        }
        Ok(stdout)
    }
}
