pub mod html;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::agent::AgentClient;
use crate::aggregate::{top_and_breaches, MetricAggregator};
use crate::breakdown::collect_5xx_breakdown;
use crate::email::send_report_email;
use crate::loki::top_error_messages;
use crate::slack::upload_report_to_slack;
use crate::state::AppState;
use crate::types::{ErrorBreakdown, HealthcheckResult, ReportSnapshot, ResourceUsage};

/// Collection budgets per data source branch.
const CLUSTER_BUDGET: Duration = Duration::from_secs(10);
const PROMETHEUS_BUDGET: Duration = Duration::from_secs(30);
const LOKI_BUDGET: Duration = Duration::from_secs(20);

const REPORT_STEP: &str = "5m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportType {
    Daily,
    Weekly,
    Monthly,
}

impl ReportType {
    pub fn label_ko(self) -> &'static str {
        match self {
            ReportType::Daily => "일일",
            ReportType::Weekly => "주간",
            ReportType::Monthly => "월간",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportType::Daily => "daily",
            ReportType::Weekly => "weekly",
            ReportType::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

impl FromStr for ReportType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(ReportType::Daily),
            "weekly" => Ok(ReportType::Weekly),
            "monthly" => Ok(ReportType::Monthly),
            other => Err(anyhow::anyhow!("Unknown report type: {}", other)),
        }
    }
}

/// The reporting window for a run started at `now`: the current day so far,
/// the previous full week (Sunday to Saturday), or the previous full month.
pub fn report_window(report_type: ReportType, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive();
    match report_type {
        ReportType::Daily => (at(today, 0, 0, 0, now), at(today, 23, 59, 59, now)),
        ReportType::Weekly => {
            let days_since_sunday = today.weekday().num_days_from_sunday() as i64;
            let last_sunday = today - ChronoDuration::days(days_since_sunday + 7);
            let saturday = last_sunday + ChronoDuration::days(6);
            (at(last_sunday, 0, 0, 0, now), at(saturday, 23, 59, 59, now))
        }
        ReportType::Monthly => {
            let first_of_this_month = today.with_day(1).unwrap_or(today);
            let last_of_previous = first_of_this_month - ChronoDuration::days(1);
            let first_of_previous = last_of_previous.with_day(1).unwrap_or(last_of_previous);
            (at(first_of_previous, 0, 0, 0, now), at(last_of_previous, 23, 59, 59, now))
        }
    }
}

fn at(date: NaiveDate, h: u32, m: u32, s: u32, fallback: DateTime<Utc>) -> DateTime<Utc> {
    date.and_hms_opt(h, m, s)
        .map(|dt| Utc.from_utc_datetime(&dt))
        .unwrap_or(fallback)
}

/// Awaits a fallible branch under a time budget; a failure or timeout logs
/// a warning and yields the branch's neutral default so the report always
/// materializes.
pub async fn or_default<T, F>(what: &str, budget: Duration, fut: F, default: T) -> T
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            warn!("{} collection failed, using defaults: {:#}", what, e);
            default
        }
        Err(_) => {
            warn!("{} collection timed out after {:?}, using defaults", what, budget);
            default
        }
    }
}

/// Fans out to every data source concurrently and assembles the snapshot.
/// Individual branch failures degrade to per-section defaults.
pub async fn collect_snapshot(
    state: &AppState,
    node: Option<&str>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ReportSnapshot {
    let cfg = &state.cfg;
    let aggregator = MetricAggregator::new(&state.prom, cfg);
    let empty_usage = || ResourceUsage::empty(cfg.cpu_thresholds(), cfg.memory_thresholds());

    let (
        cluster_overview,
        nodes,
        resource_usage,
        container_cpu,
        container_memory,
        pod_cpu,
        pod_memory,
        error_breakdown,
        top_errors,
        healthcheck,
    ) = tokio::join!(
        or_default(
            "cluster overview",
            CLUSTER_BUDGET,
            state.cluster.cluster_overview(),
            Default::default()
        ),
        or_default("node inventory", CLUSTER_BUDGET, state.cluster.nodes(), Vec::new()),
        or_default(
            "resource usage",
            PROMETHEUS_BUDGET,
            aggregator.resource_usage(node, start, end, REPORT_STEP),
            empty_usage()
        ),
        or_default(
            "container cpu",
            PROMETHEUS_BUDGET,
            aggregator.container_cpu(node, start, end, REPORT_STEP),
            Vec::new()
        ),
        or_default(
            "container memory",
            PROMETHEUS_BUDGET,
            aggregator.container_memory(node, start, end, REPORT_STEP),
            Vec::new()
        ),
        or_default(
            "pod cpu",
            PROMETHEUS_BUDGET,
            aggregator.pod_cpu(node, start, end, REPORT_STEP),
            Vec::new()
        ),
        or_default(
            "pod memory",
            PROMETHEUS_BUDGET,
            aggregator.pod_memory(node, start, end, REPORT_STEP),
            Vec::new()
        ),
        collect_breakdown_budgeted(state),
        or_default(
            "top errors",
            LOKI_BUDGET,
            collect_top_errors(state, start, end),
            Vec::new()
        ),
        or_default(
            "healthcheck",
            LOKI_BUDGET,
            state.cluster.healthcheck_status(cfg),
            HealthcheckResult::default()
        ),
    );

    ReportSnapshot {
        node: node.unwrap_or("all").to_string(),
        period_start: start,
        period_end: end,
        generated_at: Utc::now(),
        cluster_overview,
        nodes,
        resource_usage,
        container_cpu: top_and_breaches(&container_cpu, cfg.cpu_warning_percent, node),
        container_memory: top_and_breaches(&container_memory, cfg.memory_warning_percent, node),
        pod_cpu: top_and_breaches(&pod_cpu, cfg.cpu_warning_percent, node),
        pod_memory: top_and_breaches(&pod_memory, cfg.memory_warning_percent, node),
        error_breakdown,
        top_errors,
        healthcheck,
    }
}

/// The breakdown never fails internally, but it still gets a time budget.
async fn collect_breakdown_budgeted(state: &AppState) -> ErrorBreakdown {
    match tokio::time::timeout(
        PROMETHEUS_BUDGET,
        collect_5xx_breakdown(&state.prom, &state.cfg),
    )
    .await
    {
        Ok(breakdown) => breakdown,
        Err(_) => {
            warn!("5xx breakdown timed out, using defaults");
            ErrorBreakdown::default()
        }
    }
}

async fn collect_top_errors(
    state: &AppState,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<crate::types::TopErrorMessage>> {
    let streams = state
        .loki
        .error_logs(&state.cfg.app_namespace_regex, start, end, 1000)
        .await?;
    Ok(top_error_messages(&streams, 10))
}

/// Produces the analysis narrative for the snapshot. When the agent is
/// configured its streamed answer is wrapped in the report shell; when it is
/// unreachable the locally rendered template stands in. An agent that
/// answers with empty text fails the report outright.
pub async fn narrative_html(state: &AppState, report_type: ReportType, snapshot: &ReportSnapshot) -> Result<String> {
    let client = match AgentClient::from_config(&state.cfg) {
        Some(client) => client?,
        None => {
            info!("Analysis agent not configured, using built-in template");
            return Ok(html::render_template(report_type, snapshot));
        }
    };

    let input = json!({
        "task": "infra-report",
        "reportType": report_type.to_string(),
        "snapshot": snapshot,
    });
    match client.invoke(&input).await {
        Ok(analysis) => Ok(html::wrap_agent_analysis(report_type, snapshot, &analysis)),
        Err(e) if e.downcast_ref::<crate::agent::EmptyAgentResponse>().is_some() => Err(e),
        Err(e) => {
            warn!("Analysis agent unreachable, using built-in template: {:#}", e);
            Ok(html::render_template(report_type, snapshot))
        }
    }
}

/// Full report pipeline: collect, narrate, render, deliver. Delivery sinks
/// run concurrently and fail independently; an undelivered report is logged,
/// not fatal to the other sink.
pub async fn generate_and_deliver(state: &AppState, report_type: ReportType) -> Result<()> {
    let (start, end) = report_window(report_type, Utc::now());
    info!("Generating {} report for {} ~ {}", report_type, start, end);

    let snapshot = collect_snapshot(state, None, start, end).await;
    let html = narrative_html(state, report_type, &snapshot).await?;
    let pdf = state.pdf.render(html).await?;

    let cfg = &state.cfg;
    let slack_configured = cfg.slack_bot_token.is_some() && cfg.slack_channel.is_some();
    let email_configured = cfg.email_api_url.is_some() && !cfg.team_emails.is_empty();

    let (slack, email) = tokio::join!(
        async {
            if !slack_configured {
                info!("Slack delivery not configured, skipping");
                return true;
            }
            match upload_report_to_slack(&state.http, cfg, report_type, &snapshot, &pdf).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Slack delivery failed: {:#}", e);
                    false
                }
            }
        },
        async {
            if !email_configured {
                info!("Email delivery not configured, skipping");
                return true;
            }
            match send_report_email(&state.http, cfg, report_type, &snapshot, &pdf).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Email delivery failed: {:#}", e);
                    false
                }
            }
        }
    );

    if !slack && !email {
        return Err(anyhow::anyhow!("Report generated but every delivery sink failed"));
    }
    info!("{} report delivered", report_type);
    Ok(())
}
