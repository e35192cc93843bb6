//! The staged analyzer: metrics, process snapshot, phase 1 scoring, script
//! resolution, phase 2 re-scoring, then reconciliation into the store.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::reconcile;
use super::record::{AnalysisRecord, ReviewStatus, PHASE2_NOT_EVALUATED};
use super::{AnalysisError, Phase1Verdict, Phase2Verdict};
use crate::config::{AnalysisConfig, Config};
use crate::inspect::process::{fallback_pid, ps_command};
use crate::inspect::script::{read_command_line, read_script, resolve_script_path};
use crate::inspect::{ContainerHandle, Pod, PodProvider};
use crate::jobs::{EligibilityPolicy, Job, JobStore};
use crate::llm::{complete_json, prompt, LlmClient};
use crate::metrics::{GpuMetrics, MetricsProvider};
use crate::storage::RecordStore;

/// External systems the analyzer talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobStore>,
    pub pods: Arc<dyn PodProvider>,
    pub metrics: Arc<dyn MetricsProvider>,
    /// `None` when no client could be built from the LLM settings.
    pub llm: Option<Arc<dyn LlmClient>>,
    pub records: Arc<dyn RecordStore>,
}

pub struct Analyzer {
    jobs: Arc<dyn JobStore>,
    pods: Arc<dyn PodProvider>,
    metrics: Arc<dyn MetricsProvider>,
    /// The client, or why analysis is unavailable.
    llm: Result<Arc<dyn LlmClient>, String>,
    records: Arc<dyn RecordStore>,
    policy: EligibilityPolicy,
    cfg: AnalysisConfig,
    job_label: String,
}

impl Analyzer {
    pub fn new(deps: Collaborators, config: &Config) -> Self {
        let llm = match (config.llm.readiness_problem(), deps.llm) {
            (Some(problem), _) => Err(problem.to_string()),
            (None, Some(client)) => Ok(client),
            (None, None) => Err("LLM client is unavailable".to_string()),
        };
        Self {
            jobs: deps.jobs,
            pods: deps.pods,
            metrics: deps.metrics,
            llm,
            records: deps.records,
            policy: EligibilityPolicy::from_config(&config.analysis),
            cfg: config.analysis.clone(),
            job_label: config.kubernetes.job_label.clone(),
        }
    }

    pub fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    fn llm(&self) -> Result<Arc<dyn LlmClient>, AnalysisError> {
        self.llm.clone().map_err(AnalysisError::Configuration)
    }

    /// Fails with [`AnalysisError::Configuration`] when analysis is off.
    pub fn ensure_ready(&self) -> Result<(), AnalysisError> {
        self.llm().map(|_| ())
    }

    async fn find_job(&self, name: &str) -> Result<Job, AnalysisError> {
        self.jobs
            .get(name)
            .await
            .map_err(AnalysisError::Persistence)?
            .ok_or_else(|| AnalysisError::NotFound(format!("job '{}' not found", name)))
    }

    /// Analyze the running pod of an eligible job.
    pub async fn analyze_job(&self, job_name: &str) -> Result<AnalysisRecord, AnalysisError> {
        self.ensure_ready()?;
        let job = self.find_job(job_name).await?;
        if !self.policy.is_eligible(&job, Utc::now()) {
            return Err(AnalysisError::NotEligible {
                name: job.name,
                status: job.status.to_string(),
            });
        }

        let pod = self
            .pods
            .running_pod_for_job(&job)
            .await
            .map_err(AnalysisError::Pod)?
            .ok_or_else(|| AnalysisError::NotFound(format!("no running pod found for job '{}'", job_name)))?;

        info!(job = %job.name, pod = %pod.name, "Found running pod, starting analysis");
        self.inspect(&job, &pod).await
    }

    /// Analyze a pod by name. Eligibility is not checked: this is the
    /// manual path for on-demand inspection.
    pub async fn analyze_pod(&self, namespace: &str, pod_name: &str) -> Result<AnalysisRecord, AnalysisError> {
        self.ensure_ready()?;
        let pod = self
            .pods
            .get_pod(namespace, pod_name)
            .await
            .map_err(AnalysisError::Pod)?
            .ok_or_else(|| AnalysisError::NotFound(format!("pod {}/{} not found", namespace, pod_name)))?;

        let job_name = pod.label(&self.job_label).ok_or_else(|| {
            AnalysisError::NotFound(format!("pod {} is missing '{}' label", pod.name, self.job_label))
        })?;
        let job = self.find_job(job_name).await?;
        self.inspect(&job, &pod).await
    }

    /// Run every stage against `pod` and persist the outcome.
    pub async fn inspect(&self, job: &Job, pod: &Pod) -> Result<AnalysisRecord, AnalysisError> {
        let llm = self.llm()?;
        let container = pod
            .primary_container()
            .ok_or_else(|| AnalysisError::Pod(anyhow::anyhow!("pod {} has no containers", pod.name)))?;
        let handle = ContainerHandle::new(self.pods.clone(), pod, container);

        let metrics = match self
            .metrics
            .query_window(&pod.namespace, &pod.name, self.cfg.metrics_window())
            .await
        {
            Ok(m) => m,
            Err(e) => {
                warn!(pod = %pod.name, error = %e, "Metrics query failed, continuing with zeros");
                GpuMetrics::default()
            }
        };

        let table = match handle.shell(&ps_command(self.cfg.process_rows)).await {
            Ok(out) => out.trim().to_string(),
            Err(e) => {
                warn!(pod = %pod.name, error = %e, "Process listing failed");
                String::new()
            }
        };

        let verdict1: Phase1Verdict = complete_json(
            llm.as_ref(),
            prompt::system_prompt(),
            &prompt::phase1_prompt(&metrics, &table),
        )
        .await
        .map_err(|source| AnalysisError::Llm {
            pod: pod.name.clone(),
            source,
        })?;

        let pid = fallback_pid(verdict1.pid, &table, &self.cfg.diagnostic_patterns);
        let command = match read_command_line(&handle, pid).await {
            Ok(c) => c,
            Err(e) => {
                warn!(pod = %pod.name, pid, error = %e, "Could not resolve command line");
                String::new()
            }
        };

        let mut script_content = String::new();
        let mut phase2: Option<Phase2Verdict> = None;
        if verdict1.score > self.cfg.phase2_threshold && pid > 0 {
            match self.fetch_script(&handle, pid, &command).await {
                Ok(script) => {
                    phase2 = self
                        .second_opinion(llm.as_ref(), pod, &metrics, &command, &script, &verdict1.reason)
                        .await;
                    script_content = script;
                }
                Err(e) => warn!(pod = %pod.name, pid, error = %e, "Could not find or read script"),
            }
        }

        let (phase2_score, phase2_reason) = match phase2 {
            Some(v) => (v.score, v.reason),
            None => (PHASE2_NOT_EVALUATED, String::new()),
        };

        let record = AnalysisRecord {
            id: None,
            job_id: job.id,
            job_name: job.name.clone(),
            pod_name: pod.name.clone(),
            namespace: pod.namespace.clone(),
            user_id: job.user_id,
            user_name: job.user_name.clone(),
            phase1_score: verdict1.score,
            phase2_score,
            phase1_reason: verdict1.reason,
            phase2_reason,
            model_version: llm.model_name().to_string(),
            command,
            script_content,
            metrics_snapshot: serde_json::to_string(&metrics).unwrap_or_default(),
            review_status: ReviewStatus::Pending,
            created_at: Utc::now(),
            deleted_at: None,
        };

        let saved = self.save(record)?;
        info!(
            pod = %pod.name,
            job = %job.name,
            phase1 = saved.phase1_score,
            phase2 = saved.phase2_score,
            "Analysis saved"
        );
        Ok(saved)
    }

    async fn fetch_script(&self, handle: &ContainerHandle, pid: i64, command: &str) -> Result<String, AnalysisError> {
        let path = resolve_script_path(handle, pid, command).await?;
        Ok(read_script(handle, &path, self.cfg.max_script_chars).await?)
    }

    async fn second_opinion(
        &self,
        llm: &dyn LlmClient,
        pod: &Pod,
        metrics: &GpuMetrics,
        command: &str,
        script: &str,
        phase1_reason: &str,
    ) -> Option<Phase2Verdict> {
        let user = prompt::phase2_prompt(metrics, command, script, phase1_reason);
        match complete_json(llm, prompt::system_prompt(), &user).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(pod = %pod.name, error = %e, "LLM phase 2 call failed");
                None
            }
        }
    }

    /// Reconcile `record` against the job's stored findings.
    fn save(&self, record: AnalysisRecord) -> Result<AnalysisRecord, AnalysisError> {
        let existing = self
            .records
            .list_for_job(record.job_id)
            .map_err(AnalysisError::Persistence)?;
        let plan = reconcile::plan(&existing, record);
        self.records.apply_plan(&plan).map_err(AnalysisError::Persistence)
    }
}
