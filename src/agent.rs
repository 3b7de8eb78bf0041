use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::json;
use tracing::debug;

use crate::types::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// The agent completed the stream but produced no text. Distinguished from
/// transport failures so callers can treat it as non-retryable.
#[derive(Debug, thiserror::Error)]
#[error("Agent returned an empty response")]
pub struct EmptyAgentResponse;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Client for the narrative analysis agent. The agent streams its answer
/// as plain chunks; the full concatenated text is the result.
#[derive(Debug, Clone)]
pub struct AgentClient {
    base_url: String,
    agent_id: String,
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(base_url: &str, agent_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build agent HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent_id: agent_id.to_string(),
            http,
        })
    }

    /// Builds a client from configuration, or `None` when the agent
    /// integration is not configured.
    pub fn from_config(cfg: &Config) -> Option<Result<Self>> {
        match (cfg.agent_url.as_deref(), cfg.agent_id.as_deref()) {
            (Some(url), Some(id)) => Some(Self::new(url, id)),
            _ => None,
        }
    }

    /// Invokes the agent with a JSON payload and drains the streamed
    /// response. An empty final text is a hard error: a report with a
    /// blank analysis section is worse than a failed one.
    pub async fn invoke(&self, input: &serde_json::Value) -> Result<String> {
        let session = next_session_id();
        let url = format!("{}/agents/{}/invoke", self.base_url, self.agent_id);
        debug!("Invoking analysis agent, session {}", session);

        let response = self
            .http
            .post(&url)
            .json(&json!({ "sessionId": session, "input": input }))
            .send()
            .await
            .context("Agent request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Agent returned HTTP {}", status));
        }

        let mut stream = response.bytes_stream();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Agent stream interrupted")?;
            text.push_str(&String::from_utf8_lossy(&chunk));
        }

        if text.trim().is_empty() {
            return Err(EmptyAgentResponse.into());
        }
        Ok(text)
    }
}

fn next_session_id() -> String {
    let seq = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("session-{}-{}", Utc::now().timestamp_millis(), seq)
}
