//! TOML configuration for the gpuwarden daemon.
//!
//! A layered model: an explicit path, then the `GPUWARDEN_CONFIG`
//! environment variable, then the standard system location, then
//! compiled-in defaults. Every field carries a default so a partial file
//! is always valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::llm::LlmSettings;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "GPUWARDEN_CONFIG";
/// Environment variable overriding `[llm].api_key`.
pub const API_KEY_ENV: &str = "GPUWARDEN_LLM_API_KEY";
const SYSTEM_CONFIG_PATH: &str = "/etc/gpuwarden/gpuwarden.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the gpuwarden process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub patrol: PatrolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides();
        info!(path = %path.display(), "Loaded gpuwarden configuration");
        Ok(config)
    }

    /// Resolve configuration from, in order:
    /// 1. `explicit` (the `--config` flag), which must load if given.
    /// 2. The path in `GPUWARDEN_CONFIG`.
    /// 3. `/etc/gpuwarden/gpuwarden.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "GPUWARDEN_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "System config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("No config file found, using compiled-in defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.llm.api_key = key;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding both the `jobs` and `gpu_analyses` tables.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/gpuwarden.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Prometheus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Base URL of the Prometheus HTTP API (without `/api/v1`).
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: "http://prometheus:9090".to_string(),
            timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Kubernetes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// `kubectl` binary used for pod lookup and exec.
    pub kubectl_path: String,
    /// Optional kubeconfig; in-cluster credentials are used when unset.
    pub kubeconfig: Option<PathBuf>,
    /// Pod label carrying the owning job's name.
    pub job_label: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            kubectl_path: "kubectl".to_string(),
            kubeconfig: None,
            job_label: "volcano.sh/job-name".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Knobs of the staged analyzer and the eligibility filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum time a job must have been running before it is analyzed.
    pub min_job_age_secs: u64,
    /// Window for the GPU utilization/memory statistics.
    pub metrics_window_secs: u64,
    /// Number of process-table rows captured (sorted by memory share).
    pub process_rows: usize,
    /// Phase 2 runs only when the phase 1 score is strictly above this.
    pub phase2_threshold: i32,
    /// Script content beyond this many characters is truncated.
    pub max_script_chars: usize,
    /// Substrings marking our own inspection commands in the process table.
    pub diagnostic_patterns: Vec<String>,
    /// Resource-name substrings that identify accelerator claims.
    pub accelerator_patterns: Vec<String>,
}

impl AnalysisConfig {
    pub fn min_job_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_job_age_secs as i64)
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window_secs)
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_job_age_secs: 2 * 3600,
            metrics_window_secs: 2 * 3600,
            process_rows: 20,
            phase2_threshold: 3,
            max_script_chars: 15_000,
            diagnostic_patterns: ["ps -eo", "ps -ao", "ps aux", "grep", "head -n", "cat /proc"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            accelerator_patterns: ["gpu", "nvidia.com", "amd.com"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Patrol
// ---------------------------------------------------------------------------

/// Work queue, worker pacing, retention and patrol schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatrolConfig {
    /// Capacity of the bounded analysis queue.
    pub queue_capacity: usize,
    /// Pause between two analyzed jobs.
    pub worker_interval_secs: u64,
    /// Reviewed findings older than this are removed by the overtime sweep.
    pub retention_days: i64,
    /// Six-field cron expression (with seconds) for the periodic patrol.
    pub cron: String,
    /// Whether `serve` runs the periodic patrol at all.
    pub enabled: bool,
}

impl PatrolConfig {
    pub fn worker_interval(&self) -> Duration {
        Duration::from_secs(self.worker_interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4000,
            worker_interval_secs: 2,
            retention_days: 7,
            cron: "0 */30 * * * *".to_string(),
            enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();

        assert_eq!(cfg.database.path, PathBuf::from("data/gpuwarden.db"));

        assert!(!cfg.llm.enabled);
        assert_eq!(cfg.llm.timeout_secs, 120);

        assert_eq!(cfg.kubernetes.job_label, "volcano.sh/job-name");

        assert_eq!(cfg.analysis.min_job_age_secs, 7200);
        assert_eq!(cfg.analysis.metrics_window(), Duration::from_secs(7200));
        assert_eq!(cfg.analysis.process_rows, 20);
        assert_eq!(cfg.analysis.phase2_threshold, 3);
        assert_eq!(cfg.analysis.max_script_chars, 15_000);
        assert!(cfg.analysis.diagnostic_patterns.contains(&"cat /proc".to_string()));

        assert_eq!(cfg.patrol.queue_capacity, 4000);
        assert_eq!(cfg.patrol.worker_interval(), Duration::from_secs(2));
        assert_eq!(cfg.patrol.retention(), chrono::Duration::days(7));

        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[llm]
enabled = true
base_url = "https://llm.internal/v1/"
model = "qwen2.5-72b"

[analysis]
diagnostic_patterns = ["nvidia-smi"]

[patrol]
queue_capacity = 16
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert!(cfg.llm.enabled);
        assert_eq!(cfg.llm.model, "qwen2.5-72b");
        assert_eq!(cfg.analysis.diagnostic_patterns, vec!["nvidia-smi".to_string()]);
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.analysis.process_rows, 20);
        assert_eq!(cfg.patrol.queue_capacity, 16);
        assert_eq!(cfg.patrol.retention_days, 7);
        assert_eq!(cfg.prometheus.url, "http://prometheus:9090");
    }

    #[test]
    fn test_kubernetes_section_keys() {
        let value = toml::Value::try_from(KubernetesConfig::default()).unwrap();
        let mut keys: Vec<&str> = value.as_table().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        // `kubeconfig` is unset and so omitted.
        assert_eq!(keys, vec!["job_label", "kubectl_path"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpuwarden.toml");
        std::fs::write(&path, "[database]\npath = \"/tmp/x.db\"\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.database.path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        assert!(Config::resolve(Some(Path::new("/nonexistent/gpuwarden.toml"))).is_err());
    }
}
