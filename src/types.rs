use chrono::{DateTime, Utc};
use serde::Serialize;

/// Runtime configuration, resolved once at startup from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub prometheus_url: String,
    pub loki_url: String,
    /// Namespace regex selecting application workloads for the application
    /// error tier and for Loki log queries.
    pub app_namespace_regex: String,
    pub cpu_warning_percent: f64,
    pub cpu_critical_percent: f64,
    pub memory_warning_percent: f64,
    pub memory_critical_percent: f64,
    pub error_rate_warning_percent: f64,
    pub error_rate_critical_percent: f64,
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
    pub error_tiers: ErrorTiers,
    pub healthcheck_namespace: String,
    pub healthcheck_selector: String,
    pub healthcheck_container: Option<String>,
    pub agent_url: Option<String>,
    pub agent_id: Option<String>,
    pub slack_api_url: String,
    pub slack_bot_token: Option<String>,
    pub slack_channel: Option<String>,
    pub slack_webhook_url: Option<String>,
    /// Seconds between threshold alert sweeps.
    pub alert_interval_secs: u64,
    pub email_api_url: Option<String>,
    pub email_from: String,
    pub team_emails: Vec<String>,
}

impl Config {
    pub fn cpu_thresholds(&self) -> ThresholdPair {
        ThresholdPair { warning: self.cpu_warning_percent, critical: self.cpu_critical_percent }
    }

    pub fn memory_thresholds(&self) -> ThresholdPair {
        ThresholdPair { warning: self.memory_warning_percent, critical: self.memory_critical_percent }
    }
}

/// Which 5xx error tiers apply to the monitored cluster. A disabled tier
/// reports a zero count without ever being queried.
#[derive(Debug, Clone)]
pub struct ErrorTiers {
    pub haproxy: bool,
    pub gateway: bool,
    pub application: bool,
    pub downstream: bool,
}

impl Default for ErrorTiers {
    fn default() -> Self {
        Self { haproxy: true, gateway: true, application: true, downstream: true }
    }
}

/// One per-tier slice of the 5xx breakdown. `percentage` is pre-formatted
/// with one decimal place, or `"0"` when the overall total is zero.
#[derive(Debug, Clone, Serialize)]
pub struct TierStat {
    pub count: f64,
    pub percentage: String,
}

impl Default for TierStat {
    fn default() -> Self {
        Self { count: 0.0, percentage: "0".to_string() }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorBreakdown {
    pub haproxy: TierStat,
    pub gateway: TierStat,
    pub application: TierStat,
    pub downstream: TierStat,
    pub total: f64,
}

/// A deduplicated error message aggregated from Loki streams.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopErrorMessage {
    pub message: String,
    pub count: u64,
    pub namespace: String,
    pub service: String,
    pub last_occurred: DateTime<Utc>,
}

/// A single parsed log line from Loki.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    pub namespace: String,
    pub service: String,
}

/// Identity of one usage time series. Per-container series carry all three
/// labels; per-pod series leave `container` unset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
}

impl SeriesKey {
    /// Display name for the series: the container when present, else the pod.
    pub fn display_name(&self) -> &str {
        self.container.as_deref().unwrap_or(&self.pod)
    }
}

/// A usage time series joined with its resource limit, when one exists.
/// Samples are `(unix_seconds, value)` pairs in base units (cores or bytes).
#[derive(Debug, Clone)]
pub struct ResourceSeries {
    pub key: SeriesKey,
    pub samples: Vec<(i64, f64)>,
    pub limit: Option<f64>,
}

impl ResourceSeries {
    pub fn current(&self) -> f64 {
        self.samples.last().map(|&(_, v)| v).unwrap_or(0.0)
    }

    pub fn peak(&self) -> f64 {
        self.samples.iter().map(|&(_, v)| v).fold(0.0, f64::max)
    }

    /// Current usage as a percentage of the limit. A series without a limit
    /// reports 0 so it can never trip a threshold.
    pub fn current_percent(&self) -> f64 {
        match self.limit {
            Some(limit) if limit > 0.0 => self.current() / limit * 100.0,
            _ => 0.0,
        }
    }

    pub fn percent_samples(&self) -> Vec<(i64, f64)> {
        match self.limit {
            Some(limit) if limit > 0.0 => {
                self.samples.iter().map(|&(ts, v)| (ts, v / limit * 100.0)).collect()
            }
            _ => self.samples.iter().map(|&(ts, _)| (ts, 0.0)).collect(),
        }
    }
}

/// Chart-ready view of one series.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesView {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    /// `[timestamp, value]` pairs; cores for CPU, percent-of-limit for memory.
    pub data: Vec<(i64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_bytes_data: Option<Vec<(i64, f64)>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_bytes: Option<f64>,
}

/// One consumer in a Top-N ranking, in raw base units. `node` is set when
/// the ranking was computed over a node-filtered window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopConsumer {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub current_usage: f64,
    pub peak_usage: f64,
    pub trend: String,
}

/// A consumer whose percent-of-limit usage exceeded the warning threshold.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdBreach {
    #[serde(flatten)]
    pub consumer: TopConsumer,
    pub usage_percent: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopAndBreaches {
    pub top5: Vec<TopConsumer>,
    pub over_threshold: Vec<ThresholdBreach>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelinePoint {
    pub timestamp: i64,
    pub value: f64,
}

/// Cluster-level utilization of one resource, in percent.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub current: f64,
    pub average: f64,
    pub peak: f64,
    pub threshold: ThresholdPair,
    pub timeline: Vec<TimelinePoint>,
}

impl UsageSummary {
    pub fn empty(threshold: ThresholdPair) -> Self {
        Self { current: 0.0, average: 0.0, peak: 0.0, threshold, timeline: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub cpu: UsageSummary,
    pub memory: UsageSummary,
}

impl ResourceUsage {
    pub fn empty(cpu: ThresholdPair, memory: ThresholdPair) -> Self {
        Self { cpu: UsageSummary::empty(cpu), memory: UsageSummary::empty(memory) }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeCounts {
    pub total: usize,
    pub ready: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PodCounts {
    pub total: usize,
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterOverview {
    pub nodes: NodeCounts,
    pub pods: PodCounts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub role: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubelet_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_capacity_cores: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_capacity_bytes: Option<f64>,
}

/// One failure line extracted from a healthcheck probe pod's logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeLogError {
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PodHealthErrors {
    pub pod: String,
    pub node: String,
    pub errors: Vec<ProbeLogError>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthcheckResult {
    pub has_errors: bool,
    pub errors: Vec<PodHealthErrors>,
    pub checked_pods: usize,
}

/// Everything a report needs, collected in one fan-out pass. Sections that
/// failed to collect hold their neutral defaults.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSnapshot {
    pub node: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub cluster_overview: ClusterOverview,
    pub nodes: Vec<NodeInfo>,
    pub resource_usage: ResourceUsage,
    pub container_cpu: TopAndBreaches,
    pub container_memory: TopAndBreaches,
    pub pod_cpu: TopAndBreaches,
    pub pod_memory: TopAndBreaches,
    pub error_breakdown: ErrorBreakdown,
    pub top_errors: Vec<TopErrorMessage>,
    pub healthcheck: HealthcheckResult,
}
