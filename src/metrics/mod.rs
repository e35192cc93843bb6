//! GPU utilization/memory statistics over a time window.

pub mod prometheus;

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use self::prometheus::PrometheusProvider;

/// Summary statistics of a pod's GPU usage over the analysis window.
///
/// Utilization is in percent (0-100), memory in MiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuMetrics {
    pub gpu_util_avg: f64,
    pub gpu_util_std_dev: f64,
    pub gpu_mem_used_avg: f64,
    pub gpu_mem_used_std_dev: f64,
}

/// Source of [`GpuMetrics`]. Callers treat errors as "no data" rather than
/// aborting an analysis.
#[async_trait::async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn query_window(&self, namespace: &str, pod: &str, window: Duration) -> Result<GpuMetrics>;
}
