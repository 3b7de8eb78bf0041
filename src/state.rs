use std::time::Duration;

use anyhow::{Context, Result};

use crate::kubernetes::ClusterApi;
use crate::loki::LokiClient;
use crate::pdf::PdfRenderer;
use crate::prometheus::PrometheusClient;
use crate::types::Config;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handles behind the HTTP API. Built once at startup and injected
/// into every handler and the report pipeline.
pub struct AppState {
    pub cfg: Config,
    pub prom: PrometheusClient,
    pub loki: LokiClient,
    pub cluster: ClusterApi,
    pub pdf: PdfRenderer,
    /// Client for the delivery and alert sinks (Slack, mail relay, webhook).
    pub http: reqwest::Client,
}

impl AppState {
    pub async fn from_config(cfg: Config) -> Result<Self> {
        let prom = PrometheusClient::new(&cfg.prometheus_url)?;
        let loki = LokiClient::new(&cfg.loki_url)?;
        let cluster = ClusterApi::connect().await;
        Ok(Self {
            cfg,
            prom,
            loki,
            cluster,
            pdf: PdfRenderer::new(),
            http: outbound_client()?,
        })
    }
}

pub fn outbound_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(OUTBOUND_TIMEOUT)
        .build()
        .context("Failed to build outbound HTTP client")
}
