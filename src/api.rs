use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::agent::AgentClient;
use crate::aggregate::{cpu_series_views, memory_series_views, MetricAggregator};
use crate::breakdown::collect_5xx_breakdown;
use crate::csv::{generate_comprehensive_csv, UTF8_BOM};
use crate::error::ApiError;
use crate::loki::{parse_log_streams, top_error_messages};
use crate::report::{collect_snapshot, narrative_html, generate_and_deliver, ReportType};
use crate::state::AppState;

const DEFAULT_STEP: &str = "15s";

pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let port = state.cfg.port;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening on port {}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/metrics/resource-usage", get(resource_usage))
        .route("/api/metrics/containers/cpu", get(container_cpu))
        .route("/api/metrics/containers/memory", get(container_memory))
        .route("/api/metrics/pods/cpu", get(pod_cpu))
        .route("/api/metrics/pods/memory", get(pod_memory))
        .route("/api/errors/5xx", get(errors_5xx))
        .route("/api/errors/top-errors", get(top_errors))
        .route("/api/logs/errors", get(error_logs))
        .route("/api/cluster/overview", get(cluster_overview))
        .route("/api/cluster/nodes", get(cluster_nodes))
        .route("/api/healthcheck/status", get(healthcheck_status))
        .route("/api/ai/analyze", post(ai_analyze))
        .route("/api/reports/generate", post(generate_report))
        .route("/api/export/csv", get(export_csv))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct RangeQuery {
    node: Option<String>,
    start: Option<String>,
    end: Option<String>,
    step: Option<String>,
    limit: Option<u32>,
}

/// Accepts ISO-8601 or Unix epoch milliseconds.
fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(millis) = raw.parse::<i64>() {
        return Utc.timestamp_millis_opt(millis).single();
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn required_range(query: &RangeQuery) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
    let start = query.start.as_deref().and_then(parse_time);
    let end = query.end.as_deref().and_then(parse_time);
    match (start, end) {
        (Some(start), Some(end)) if start <= end => Ok((start, end)),
        _ => Err(ApiError::BadRequest(
            "start and end are required, as ISO-8601 or epoch milliseconds".to_string(),
        )),
    }
}

/// `all` and blank node selectors mean the whole cluster.
fn node_param(query: &RangeQuery) -> Option<&str> {
    query
        .node
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty() && *n != "all")
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let (prometheus, loki, kubernetes) = tokio::join!(
        state.prom.is_healthy(),
        state.loki.is_healthy(),
        state.cluster.is_healthy(),
    );

    Json(json!({
        "status": if prometheus { "ok" } else { "degraded" },
        "services": {
            "prometheus": prometheus,
            "loki": loki,
            "kubernetes": kubernetes,
        },
    }))
}

async fn resource_usage(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (start, end) = required_range(&query)?;
    let step = query.step.as_deref().unwrap_or(DEFAULT_STEP);
    let aggregator = MetricAggregator::new(&state.prom, &state.cfg);
    let usage = aggregator
        .resource_usage(node_param(&query), start, end, step)
        .await?;
    Ok(Json(usage))
}

async fn container_cpu(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (start, end) = required_range(&query)?;
    let step = query.step.as_deref().unwrap_or(DEFAULT_STEP);
    let aggregator = MetricAggregator::new(&state.prom, &state.cfg);
    let series = aggregator
        .container_cpu(node_param(&query), start, end, step)
        .await?;
    Ok(Json(cpu_series_views(&series)))
}

async fn container_memory(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (start, end) = required_range(&query)?;
    let step = query.step.as_deref().unwrap_or(DEFAULT_STEP);
    let aggregator = MetricAggregator::new(&state.prom, &state.cfg);
    let series = aggregator
        .container_memory(node_param(&query), start, end, step)
        .await?;
    Ok(Json(memory_series_views(&series)))
}

async fn pod_cpu(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (start, end) = required_range(&query)?;
    let step = query.step.as_deref().unwrap_or(DEFAULT_STEP);
    let aggregator = MetricAggregator::new(&state.prom, &state.cfg);
    let series = aggregator
        .pod_cpu(node_param(&query), start, end, step)
        .await?;
    Ok(Json(cpu_series_views(&series)))
}

async fn pod_memory(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (start, end) = required_range(&query)?;
    let step = query.step.as_deref().unwrap_or(DEFAULT_STEP);
    let aggregator = MetricAggregator::new(&state.prom, &state.cfg);
    let series = aggregator
        .pod_memory(node_param(&query), start, end, step)
        .await?;
    Ok(Json(memory_series_views(&series)))
}

/// Always 200: tiers with missing metrics report zero counts.
async fn errors_5xx(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(collect_5xx_breakdown(&state.prom, &state.cfg).await)
}

async fn top_errors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (start, end) = required_range(&query)?;
    let streams = state
        .loki
        .error_logs(&state.cfg.app_namespace_regex, start, end, 1000)
        .await?;
    let limit = query.limit.unwrap_or(10) as usize;
    Ok(Json(top_error_messages(&streams, limit)))
}

async fn error_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (start, end) = required_range(&query)?;
    let limit = query.limit.unwrap_or(500);
    let streams = state
        .loki
        .error_logs(&state.cfg.app_namespace_regex, start, end, limit)
        .await?;
    Ok(Json(parse_log_streams(&streams)))
}

async fn cluster_overview(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cluster.cluster_overview().await?))
}

async fn cluster_nodes(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cluster.nodes().await?))
}

async fn healthcheck_status(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cluster.healthcheck_status(&state.cfg).await?))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    node: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

/// On-demand narrative analysis over an arbitrary window (default: the
/// last hour). Requires the agent integration to be configured.
async fn ai_analyze(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if AgentClient::from_config(&state.cfg).is_none() {
        return Err(ApiError::Internal(anyhow!(
            "Analysis agent is not configured: set AGENT_URL and AGENT_ID"
        )));
    }

    let end = request.end.as_deref().and_then(parse_time).unwrap_or_else(Utc::now);
    let start = request
        .start
        .as_deref()
        .and_then(parse_time)
        .unwrap_or(end - chrono::Duration::hours(1));
    let node = request
        .node
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty() && *n != "all");

    let snapshot = collect_snapshot(&state, node, start, end).await;
    let html = narrative_html(&state, ReportType::Daily, &snapshot).await?;

    Ok(Json(analysis_response(html)))
}

fn analysis_response(analysis: String) -> serde_json::Value {
    json!({
        "analysis": analysis,
        "timestamp": Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    report_type: String,
}

/// Kicks off report generation and delivery in the background and returns
/// immediately. Only the detached pipeline outlives the request.
async fn generate_report(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let report_type: ReportType = request
        .report_type
        .parse()
        .map_err(|e: anyhow::Error| ApiError::BadRequest(e.to_string()))?;

    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = generate_and_deliver(&task_state, report_type).await {
            error!("{} report pipeline failed: {:#}", report_type, e);
        }
    });

    Ok(Json(json!({
        "status": "accepted",
        "reportType": report_type.to_string(),
    })))
}

/// Full snapshot as sectioned CSV. Section collection is tolerant: a failed
/// source leaves its section empty rather than failing the download.
async fn export_csv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (start, end) = required_range(&query)?;
    let node = node_param(&query);

    let snapshot = collect_snapshot(&state, node, start, end).await;
    let csv = generate_comprehensive_csv(&snapshot);

    let file_name = format!(
        "monitoring-data-{}-{}.csv",
        node.unwrap_or("cluster"),
        Utc::now().format("%Y-%m-%d")
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        format!("{}{}", UTF8_BOM, csv),
    ))
}
