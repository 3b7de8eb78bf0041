use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin client for the Prometheus HTTP API.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<PromData>,
}

#[derive(Debug, Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<PromResult>,
}

/// One series from a query result. Instant queries populate `value`,
/// range queries populate `values`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromResult {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    #[serde(default)]
    pub value: Option<(f64, String)>,
    #[serde(default)]
    pub values: Option<Vec<(f64, String)>>,
}

impl PromResult {
    /// The instant value, or 0 when absent or unparseable.
    pub fn scalar(&self) -> f64 {
        self.value
            .as_ref()
            .and_then(|(_, v)| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    /// Range samples as `(unix_seconds, value)`, dropping non-finite points.
    pub fn samples(&self) -> Vec<(i64, f64)> {
        self.values
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|(ts, v)| {
                let value = v.parse::<f64>().ok().filter(|v| v.is_finite())?;
                Some((*ts as i64, value))
            })
            .collect()
    }
}

impl PrometheusClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build Prometheus HTTP client")?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), http })
    }

    /// Evaluates an instant query.
    pub async fn query(&self, expr: &str) -> Result<Vec<PromResult>> {
        let url = format!(
            "{}/api/v1/query?query={}",
            self.base_url,
            urlencoding::encode(expr)
        );
        self.fetch(&url).await
    }

    /// Evaluates a range query. Timestamps are converted to Unix seconds
    /// here, at the adapter boundary.
    pub async fn query_range(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<PromResult>> {
        let url = format!(
            "{}/api/v1/query_range?query={}&start={}&end={}&step={}",
            self.base_url,
            urlencoding::encode(expr),
            start.timestamp(),
            end.timestamp(),
            step
        );
        self.fetch(&url).await
    }

    async fn fetch(&self, url: &str) -> Result<Vec<PromResult>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("Prometheus request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Prometheus returned HTTP {}", status));
        }

        let body: PromResponse = response
            .json()
            .await
            .context("Failed to parse Prometheus response")?;

        if body.status != "success" {
            return Err(anyhow!(
                "Prometheus query failed: {}",
                body.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }

        Ok(body.data.map(|d| d.result).unwrap_or_default())
    }

    /// Liveness probe against `/-/healthy`, for the service health endpoint.
    pub async fn is_healthy(&self) -> bool {
        let url = format!("{}/-/healthy", self.base_url);
        match self.http.get(&url).send().await {
            Ok(res) => res.status().is_success(),
            Err(_) => false,
        }
    }
}
