//! Fake collaborators for driving the analysis pipeline without a cluster.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{SubsecRound, Utc};

use gpuwarden::analysis::{Collaborators, PatrolService, QueueWorker};
use gpuwarden::config::Config;
use gpuwarden::inspect::{ExecError, Pod, PodProvider};
use gpuwarden::jobs::{Job, JobStatus, SqliteJobStore};
use gpuwarden::llm::{LlmClient, LlmError};
use gpuwarden::metrics::{GpuMetrics, MetricsProvider};
use gpuwarden::storage::{open_memory_pool, SqliteRecordStore};

pub const JOB_LABEL: &str = "volcano.sh/job-name";

#[derive(Default)]
pub struct FakePods {
    pub pods: Mutex<Vec<Pod>>,
    /// argv joined with spaces -> stdout, or stderr text for a failure.
    pub responses: Mutex<HashMap<String, Result<String, String>>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakePods {
    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn respond(&self, command: &str, stdout: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), Ok(stdout.to_string()));
    }

    pub fn fail(&self, command: &str, stderr: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), Err(stderr.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PodProvider for FakePods {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
            .cloned())
    }

    async fn running_pod_for_job(&self, job: &Job) -> Result<Option<Pod>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.label(JOB_LABEL) == Some(job.name.as_str()) && p.is_running())
            .cloned())
    }

    async fn exec(&self, _ns: &str, _pod: &str, _container: &str, argv: &[String]) -> Result<String, ExecError> {
        let command = argv.join(" ");
        self.calls.lock().unwrap().push(command.clone());
        match self.responses.lock().unwrap().get(&command) {
            Some(Ok(stdout)) => Ok(stdout.clone()),
            Some(Err(stderr)) => Err(ExecError::Stderr {
                command,
                stderr: stderr.clone(),
            }),
            None => Err(ExecError::Failed {
                command,
                code: Some(1),
                stderr: "No such file or directory".to_string(),
            }),
        }
    }
}

pub struct FakeMetrics {
    pub value: Option<GpuMetrics>,
}

#[async_trait]
impl MetricsProvider for FakeMetrics {
    async fn query_window(&self, _ns: &str, _pod: &str, _window: Duration) -> Result<GpuMetrics> {
        self.value.ok_or_else(|| anyhow!("prometheus unreachable"))
    }
}

/// Answers completions from a script; an `Err(status)` entry simulates an
/// HTTP failure.
#[derive(Default)]
pub struct FakeLlm {
    pub replies: Mutex<VecDeque<Result<String, u16>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    pub fn reply(&self, content: &str) {
        self.replies.lock().unwrap().push_back(Ok(content.to_string()));
    }

    pub fn fail(&self, status: u16) {
        self.replies.lock().unwrap().push_back(Err(status));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(user.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(content)) => Ok(content),
            Some(Err(status)) => Err(LlmError::Status(status)),
            None => Err(LlmError::NoChoices),
        }
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.llm.enabled = true;
    config.llm.base_url = "http://llm.invalid/v1".to_string();
    config.llm.model = "fake-model".to_string();
    config.patrol.worker_interval_secs = 0;
    config
}

pub fn gpu_job(id: i64, name: &str, age_hours: i64) -> Job {
    let mut resources = BTreeMap::new();
    resources.insert("nvidia.com/gpu".to_string(), "1".to_string());
    Job {
        id,
        name: name.to_string(),
        namespace: "jobs".to_string(),
        user_id: 7,
        user_name: "alice".to_string(),
        status: JobStatus::Running,
        locked_until: None,
        running_since: Some(Utc::now().trunc_subsecs(0) - chrono::Duration::hours(age_hours)),
        resources,
    }
}

pub fn pod_for(job: &Job) -> Pod {
    let mut labels = BTreeMap::new();
    labels.insert(JOB_LABEL.to_string(), job.name.clone());
    Pod {
        name: format!("{}-default0-0", job.name),
        namespace: job.namespace.clone(),
        labels,
        phase: "Running".to_string(),
        containers: vec!["main".to_string()],
    }
}

pub const PS: &str = "sh -c ps -eo pid,pcpu,pmem,user,cmd --sort=-pmem | head -n 20";

pub const PS_TABLE: &str = "\
    PID %CPU %MEM USER     CMD
   1234  0.3 95.0 alice    python idle_hold.py
     88  0.0  0.1 root     ps -eo pid,pcpu,pmem,user,cmd --sort=-pmem
      1  0.0  0.2 root     /bin/sh -c python idle_hold.py
";

pub const IDLE_SCRIPT: &str = "import time\nimport torch\nx = torch.zeros(1, device='cuda')\nwhile True:\n    time.sleep(60)\n";

pub struct Harness {
    pub config: Config,
    pub jobs: Arc<SqliteJobStore>,
    pub records: Arc<SqliteRecordStore>,
    pub pods: Arc<FakePods>,
    pub llm: Arc<FakeLlm>,
    pub metrics: Option<GpuMetrics>,
}

impl Harness {
    pub fn new() -> Self {
        let pool = open_memory_pool().unwrap();
        Self {
            config: test_config(),
            jobs: Arc::new(SqliteJobStore::new(pool.clone())),
            records: Arc::new(SqliteRecordStore::new(pool)),
            pods: Arc::new(FakePods::default()),
            llm: Arc::new(FakeLlm::default()),
            metrics: Some(GpuMetrics {
                gpu_util_avg: 2.1,
                gpu_util_std_dev: 0.3,
                gpu_mem_used_avg: 30_000.0,
                gpu_mem_used_std_dev: 12.0,
            }),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            jobs: self.jobs.clone(),
            pods: self.pods.clone(),
            metrics: Arc::new(FakeMetrics { value: self.metrics }),
            llm: Some(self.llm.clone() as Arc<dyn LlmClient>),
            records: self.records.clone(),
        }
    }

    pub fn service(&self) -> (PatrolService, QueueWorker) {
        PatrolService::new(self.collaborators(), &self.config)
    }

    /// Register `job`, its running pod, and the container view of the
    /// idle-hold workload (pid 1234 running `python idle_hold.py` from
    /// `/home/alice`).
    pub fn seed_idle_job(&self, job: &Job) -> Pod {
        self.jobs.upsert(job).unwrap();
        let pod = pod_for(job);
        self.pods.add_pod(pod.clone());
        self.pods.respond(PS, PS_TABLE);
        self.pods.respond("cat /proc/1234/cmdline", "python\0idle_hold.py\0");
        self.pods.respond("stat -c %U /proc/1234", "alice\n");
        self.pods.respond("runuser -u alice -- readlink /proc/1234/cwd", "/home/alice\n");
        self.pods.respond("cat /home/alice/idle_hold.py", IDLE_SCRIPT);
        pod
    }
}
