use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::aggregate::{node_cpu_percent_query, node_memory_percent_query};
use crate::prometheus::PrometheusClient;
use crate::state::AppState;
use crate::types::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl AlertLevel {
    fn label(self) -> &'static str {
        match self {
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
        }
    }

    fn color(self) -> &'static str {
        match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "danger",
        }
    }
}

/// One threshold breach found during a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub metric: &'static str,
    pub level: AlertLevel,
    pub value: f64,
    pub threshold: f64,
    pub unit: &'static str,
}

/// Cluster-wide readings for one sweep. A metric that could not be
/// collected stays `None` and is skipped by `evaluate`.
#[derive(Debug, Clone, Default)]
pub struct Readings {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub error_rate_percent: Option<f64>,
    pub latency_p95_ms: Option<f64>,
}

pub(crate) fn error_rate_percent_query() -> String {
    "sum(rate(istio_requests_total{response_code=~\"5..\"}[5m])) \
     / sum(rate(istio_requests_total[5m])) * 100"
        .to_string()
}

pub(crate) fn latency_p95_ms_query() -> String {
    "histogram_quantile(0.95, \
     sum(rate(istio_request_duration_milliseconds_bucket[5m])) by (le))"
        .to_string()
}

/// Critical takes precedence over warning for the same metric.
pub fn evaluate(cfg: &Config, readings: &Readings) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let mut check = |metric, unit, value: Option<f64>, warning, critical| {
        let Some(value) = value else { return };
        if value > critical {
            alerts.push(Alert { metric, level: AlertLevel::Critical, value, threshold: critical, unit });
        } else if value > warning {
            alerts.push(Alert { metric, level: AlertLevel::Warning, value, threshold: warning, unit });
        }
    };

    check(
        "CPU 사용률",
        "%",
        readings.cpu_percent,
        cfg.cpu_warning_percent,
        cfg.cpu_critical_percent,
    );
    check(
        "메모리 사용률",
        "%",
        readings.memory_percent,
        cfg.memory_warning_percent,
        cfg.memory_critical_percent,
    );
    check(
        "5xx 에러율",
        "%",
        readings.error_rate_percent,
        cfg.error_rate_warning_percent,
        cfg.error_rate_critical_percent,
    );
    check(
        "P95 응답시간",
        "ms",
        readings.latency_p95_ms,
        cfg.latency_warning_ms,
        cfg.latency_critical_ms,
    );
    alerts
}

/// Slack incoming-webhook message for one breach.
pub fn webhook_payload(alert: &Alert) -> serde_json::Value {
    json!({
        "attachments": [{
            "color": alert.level.color(),
            "title": format!("[{}] 인프라 모니터링 알람", alert.level.label()),
            "fields": [
                {
                    "title": "발생 시간",
                    "value": Utc::now().to_rfc3339(),
                    "short": true,
                },
                {
                    "title": "메트릭",
                    "value": format!(
                        "{}: {:.1}{} (임계치: {:.1}{})",
                        alert.metric, alert.value, alert.unit, alert.threshold, alert.unit
                    ),
                    "short": false,
                },
            ],
            "footer": "인프라 모니터링",
            "ts": Utc::now().timestamp(),
        }]
    })
}

pub async fn send_alerts(
    http: &reqwest::Client,
    webhook_url: &str,
    alerts: &[Alert],
) -> Result<()> {
    for alert in alerts {
        let response = http
            .post(webhook_url)
            .json(&webhook_payload(alert))
            .send()
            .await
            .context("Failed to send Slack alert")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Slack webhook returned status {}", status));
        }
        info!("Slack alert sent: {} - {}", alert.level.label(), alert.metric);
    }
    Ok(())
}

/// One sweep of cluster-wide readings. Each metric is collected
/// independently; a failed query leaves its reading `None`.
pub async fn collect_readings(prom: &PrometheusClient) -> Readings {
    let memory_query = format!("avg({})", node_memory_percent_query(None));
    let cpu_query = node_cpu_percent_query(None);
    let error_rate_query = error_rate_percent_query();
    let latency_query = latency_p95_ms_query();
    let (cpu, memory, error_rate, latency) = tokio::join!(
        prom.query(&cpu_query),
        prom.query(&memory_query),
        prom.query(&error_rate_query),
        prom.query(&latency_query),
    );

    Readings {
        cpu_percent: first_scalar(cpu),
        memory_percent: first_scalar(memory),
        error_rate_percent: first_scalar(error_rate),
        latency_p95_ms: first_scalar(latency),
    }
}

fn first_scalar(results: Result<Vec<crate::prometheus::PromResult>>) -> Option<f64> {
    match results {
        Ok(results) => results.first().map(|r| r.scalar()),
        Err(e) => {
            warn!("Alert metric query failed: {:#}", e);
            None
        }
    }
}

/// Periodic threshold watcher. Does nothing when no webhook is configured.
pub async fn run_watcher(state: Arc<AppState>) {
    let Some(webhook_url) = state.cfg.slack_webhook_url.clone() else {
        warn!("SLACK_WEBHOOK_URL not configured, skipping threshold alerts");
        return;
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(state.cfg.alert_interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let readings = collect_readings(&state.prom).await;
        let alerts = evaluate(&state.cfg, &readings);
        if alerts.is_empty() {
            continue;
        }
        if let Err(e) = send_alerts(&state.http, &webhook_url, &alerts).await {
            error!("Failed to deliver threshold alerts: {:#}", e);
        }
    }
}
