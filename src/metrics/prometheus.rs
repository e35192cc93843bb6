//! Prometheus instant queries over DCGM exporter series.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use super::{GpuMetrics, MetricsProvider};
use crate::config::PrometheusConfig;

const UTIL_SERIES: &str = "DCGM_FI_DEV_GPU_UTIL";
const MEM_SERIES: &str = "DCGM_FI_DEV_FB_USED";

pub struct PrometheusProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    /// `[unix_ts, "value"]`
    value: (f64, String),
}

impl PrometheusProvider {
    pub fn new(cfg: &PrometheusConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("Failed to build Prometheus HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.url.trim().trim_end_matches('/').to_string(),
        })
    }

    async fn query_scalar(&self, promql: &str) -> Result<f64> {
        let url = format!("{}/api/v1/query", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("query", promql)])
            .send()
            .await
            .with_context(|| format!("Prometheus request failed: {}", url))?;

        if !resp.status().is_success() {
            bail!("Prometheus returned HTTP {}", resp.status());
        }

        let body: QueryResponse = resp.json().await.context("Malformed Prometheus response")?;
        parse_scalar(body)
    }
}

fn parse_scalar(body: QueryResponse) -> Result<f64> {
    if body.status != "success" {
        return Err(anyhow!(
            "Prometheus query error: {}",
            body.error.unwrap_or_else(|| "unknown".to_string())
        ));
    }
    // No series for the pod means the exporter saw nothing: report zero.
    match body.data.and_then(|d| d.result.into_iter().next()) {
        Some(sample) => {
            let v: f64 = sample.value.1.parse().context("Non-numeric sample value")?;
            Ok(if v.is_finite() { v } else { 0.0 })
        }
        None => Ok(0.0),
    }
}

/// The four PromQL expressions, in [`GpuMetrics`] field order.
pub fn window_queries(namespace: &str, pod: &str, window: Duration) -> [String; 4] {
    let range = format!("{}m", (window.as_secs() / 60).max(1));
    let sel = |series: &str| format!("{}{{namespace={:?},pod={:?}}}[{}]", series, namespace, pod, range);
    [
        format!("avg_over_time({})", sel(UTIL_SERIES)),
        format!("stddev_over_time({})", sel(UTIL_SERIES)),
        format!("avg_over_time({})", sel(MEM_SERIES)),
        format!("stddev_over_time({})", sel(MEM_SERIES)),
    ]
}

#[async_trait::async_trait]
impl MetricsProvider for PrometheusProvider {
    async fn query_window(&self, namespace: &str, pod: &str, window: Duration) -> Result<GpuMetrics> {
        let queries = window_queries(namespace, pod, window);
        let mut values = [0.0f64; 4];
        let mut failures = 0;

        for (slot, promql) in values.iter_mut().zip(queries.iter()) {
            match self.query_scalar(promql).await {
                Ok(v) => *slot = v,
                Err(e) => {
                    failures += 1;
                    warn!(%pod, query = %promql, error = %e, "GPU metric sub-query failed");
                }
            }
        }

        if failures == queries.len() {
            bail!("all GPU metric queries failed for pod {}/{}", namespace, pod);
        }

        Ok(GpuMetrics {
            gpu_util_avg: values[0],
            gpu_util_std_dev: values[1],
            gpu_mem_used_avg: values[2],
            gpu_mem_used_std_dev: values[3],
        })
    }
}
