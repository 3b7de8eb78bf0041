use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::prometheus::{PromResult, PrometheusClient};
use crate::types::{
    Config, ResourceSeries, ResourceUsage, SeriesKey, SeriesView, ThresholdBreach,
    ThresholdPair, TimelinePoint, TopAndBreaches, TopConsumer, UsageSummary,
};

/// How many trailing timeline points the cluster usage summary keeps.
const TIMELINE_POINTS: usize = 20;

/// Runs the PromQL queries behind the metrics endpoints and joins usage
/// series with their resource limits.
pub struct MetricAggregator<'a> {
    prom: &'a PrometheusClient,
    cfg: &'a Config,
}

impl<'a> MetricAggregator<'a> {
    pub fn new(prom: &'a PrometheusClient, cfg: &'a Config) -> Self {
        Self { prom, cfg }
    }

    pub async fn container_cpu(
        &self,
        node: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<ResourceSeries>> {
        let usage = container_cpu_query(node);
        let limits = limits_query("cpu", true);
        self.usage_with_limits(&usage, &limits, true, start, end, step).await
    }

    pub async fn container_memory(
        &self,
        node: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<ResourceSeries>> {
        let usage = container_memory_query(node);
        let limits = container_memory_limits_query(node);
        self.usage_with_limits(&usage, &limits, true, start, end, step).await
    }

    pub async fn pod_cpu(
        &self,
        node: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<ResourceSeries>> {
        let usage = pod_level(&container_cpu_query(node));
        let limits = limits_query("cpu", false);
        self.usage_with_limits(&usage, &limits, false, start, end, step).await
    }

    pub async fn pod_memory(
        &self,
        node: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<ResourceSeries>> {
        let usage = pod_level(&container_memory_query(node));
        let limits = pod_level(&container_memory_limits_query(node));
        self.usage_with_limits(&usage, &limits, false, start, end, step).await
    }

    /// Cluster-wide CPU and memory utilization percentages over the window.
    pub async fn resource_usage(
        &self,
        node: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<ResourceUsage> {
        let cpu_query = node_cpu_percent_query(node);
        let memory_query = node_memory_percent_query(node);

        let (cpu, memory) = tokio::join!(
            self.prom.query_range(&cpu_query, start, end, step),
            self.prom.query_range(&memory_query, start, end, step)
        );

        Ok(ResourceUsage {
            cpu: summarize(&merge_samples(cpu?), self.cfg.cpu_thresholds()),
            memory: summarize(&merge_samples(memory?), self.cfg.memory_thresholds()),
        })
    }

    /// Usage range query joined with an instant limits query. A failed
    /// limits lookup degrades to limit-less series; a failed usage lookup
    /// is the caller's problem.
    async fn usage_with_limits(
        &self,
        usage_query: &str,
        limits_query: &str,
        per_container: bool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<ResourceSeries>> {
        let (usage, limits) = tokio::join!(
            self.prom.query_range(usage_query, start, end, step),
            self.prom.query(limits_query)
        );

        let usage = usage?;
        let limits = match limits {
            Ok(limits) => limits,
            Err(e) => {
                warn!("Resource limit query failed, reporting series without limits: {:#}", e);
                Vec::new()
            }
        };

        Ok(join_usage_with_limits(usage, &limits, per_container))
    }
}

fn node_filter(node: Option<&str>) -> String {
    match node {
        Some(n) => format!(",kubernetes_io_hostname=\"{}\"", n),
        None => String::new(),
    }
}

fn container_cpu_query(node: Option<&str>) -> String {
    format!(
        "sum(rate(container_cpu_usage_seconds_total{{container!=\"POD\",container!=\"\"{}}}[5m])) by (namespace,pod,container)",
        node_filter(node)
    )
}

fn container_memory_query(node: Option<&str>) -> String {
    format!(
        "sum(container_memory_working_set_bytes{{container!=\"POD\",container!=\"\"{}}}) by (namespace,pod,container)",
        node_filter(node)
    )
}

fn container_memory_limits_query(node: Option<&str>) -> String {
    format!(
        "sum(container_spec_memory_limit_bytes{{container!=\"POD\",container!=\"\"{}}}) by (namespace,pod,container)",
        node_filter(node)
    )
}

fn limits_query(resource: &str, per_container: bool) -> String {
    let group = if per_container { "namespace,pod,container" } else { "namespace,pod" };
    format!(
        "sum(kube_pod_container_resource_limits{{resource=\"{}\"}}) by ({})",
        resource, group
    )
}

/// Rewrites a per-container aggregation into a per-pod one.
fn pod_level(query: &str) -> String {
    query.replace("by (namespace,pod,container)", "by (namespace,pod)")
}

pub(crate) fn node_cpu_percent_query(node: Option<&str>) -> String {
    let filter = match node {
        Some(n) => format!("{{mode=\"idle\",instance=~\"{}.*\"}}", n),
        None => "{mode=\"idle\"}".to_string(),
    };
    format!("100 - (avg(rate(node_cpu_seconds_total{}[5m])) * 100)", filter)
}

pub(crate) fn node_memory_percent_query(node: Option<&str>) -> String {
    let filter = match node {
        Some(n) => format!("{{instance=~\"{}.*\"}}", n),
        None => String::new(),
    };
    format!(
        "(1 - (node_memory_MemAvailable_bytes{f} / node_memory_MemTotal_bytes{f})) * 100",
        f = filter
    )
}

fn series_key(result: &PromResult, per_container: bool) -> SeriesKey {
    let get = |k: &str| result.metric.get(k).cloned().unwrap_or_else(|| "unknown".to_string());
    SeriesKey {
        namespace: get("namespace"),
        pod: get("pod"),
        container: if per_container { result.metric.get("container").cloned() } else { None },
    }
}

/// Matches usage series with limit series by their grouping labels.
/// Non-positive limits count as absent.
pub fn join_usage_with_limits(
    usage: Vec<PromResult>,
    limits: &[PromResult],
    per_container: bool,
) -> Vec<ResourceSeries> {
    let limit_map: std::collections::HashMap<SeriesKey, f64> = limits
        .iter()
        .map(|r| (series_key(r, per_container), r.scalar()))
        .filter(|&(_, v)| v > 0.0)
        .collect();

    usage
        .into_iter()
        .map(|result| {
            let key = series_key(&result, per_container);
            let limit = limit_map.get(&key).copied();
            ResourceSeries { key, samples: result.samples(), limit }
        })
        .collect()
}

fn consumer(s: &ResourceSeries) -> TopConsumer {
    TopConsumer {
        name: s.key.display_name().to_string(),
        namespace: s.key.namespace.clone(),
        pod: s.key.container.as_ref().map(|_| s.key.pod.clone()),
        node: None,
        current_usage: s.current(),
        peak_usage: s.peak(),
        // matches the upstream contract; per-series trend detection is not
        // computed from a single window
        trend: "stable".to_string(),
    }
}

/// Ranks series by current usage (raw base units) and keeps the top `n`.
/// The sort is stable, so re-ranking a ranked list is a no-op.
pub fn top_n(series: &[ResourceSeries], n: usize) -> Vec<TopConsumer> {
    let mut ranked: Vec<&ResourceSeries> = series.iter().collect();
    ranked.sort_by(|a, b| {
        b.current().partial_cmp(&a.current()).unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.into_iter().take(n).map(consumer).collect()
}

/// Series whose current percent-of-limit usage exceeds the warning
/// threshold. Series without a limit never qualify.
pub fn threshold_breaches(series: &[ResourceSeries], warning: f64) -> Vec<ThresholdBreach> {
    let mut breaches: Vec<ThresholdBreach> = series
        .iter()
        .filter(|s| s.limit.is_some() && s.current_percent() > warning)
        .map(|s| ThresholdBreach {
            consumer: consumer(s),
            usage_percent: s.current_percent(),
            threshold: warning,
        })
        .collect();
    breaches.sort_by(|a, b| {
        b.usage_percent.partial_cmp(&a.usage_percent).unwrap_or(std::cmp::Ordering::Equal)
    });
    breaches
}

pub fn top_and_breaches(
    series: &[ResourceSeries],
    warning: f64,
    node: Option<&str>,
) -> TopAndBreaches {
    let mut result = TopAndBreaches {
        top5: top_n(series, 5),
        over_threshold: threshold_breaches(series, warning),
    };
    if let Some(node) = node {
        for entry in &mut result.top5 {
            entry.node = Some(node.to_string());
        }
        for breach in &mut result.over_threshold {
            breach.consumer.node = Some(node.to_string());
        }
    }
    result
}

/// Chart view of CPU series: raw cores.
pub fn cpu_series_views(series: &[ResourceSeries]) -> Vec<SeriesView> {
    series
        .iter()
        .map(|s| SeriesView {
            name: s.key.display_name().to_string(),
            namespace: s.key.namespace.clone(),
            pod: s.key.container.as_ref().map(|_| s.key.pod.clone()),
            data: s.samples.clone(),
            usage_bytes_data: None,
            limit_bytes: None,
        })
        .collect()
}

/// Chart view of memory series: percent-of-limit as the primary axis,
/// raw bytes alongside for tooltips.
pub fn memory_series_views(series: &[ResourceSeries]) -> Vec<SeriesView> {
    series
        .iter()
        .map(|s| SeriesView {
            name: s.key.display_name().to_string(),
            namespace: s.key.namespace.clone(),
            pod: s.key.container.as_ref().map(|_| s.key.pod.clone()),
            data: s.percent_samples(),
            usage_bytes_data: Some(s.samples.clone()),
            limit_bytes: s.limit,
        })
        .collect()
}

/// Averages all returned series into one timeline. The node-level queries
/// normally return a single series; multiple series are averaged pointwise.
fn merge_samples(results: Vec<PromResult>) -> Vec<(i64, f64)> {
    use std::collections::BTreeMap;

    let mut sums: BTreeMap<i64, (f64, u32)> = BTreeMap::new();
    for result in &results {
        for (ts, value) in result.samples() {
            let entry = sums.entry(ts).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(ts, (sum, count))| (ts, sum / count as f64))
        .collect()
}

/// Current, average and peak over the window, with the timeline truncated
/// to the trailing points.
pub fn summarize(samples: &[(i64, f64)], threshold: ThresholdPair) -> UsageSummary {
    if samples.is_empty() {
        return UsageSummary::empty(threshold);
    }

    let sum: f64 = samples.iter().map(|&(_, v)| v).sum();
    let peak = samples.iter().map(|&(_, v)| v).fold(0.0, f64::max);
    let current = samples.last().map(|&(_, v)| v).unwrap_or(0.0);

    let tail_start = samples.len().saturating_sub(TIMELINE_POINTS);
    let timeline = samples[tail_start..]
        .iter()
        .map(|&(ts, v)| TimelinePoint { timestamp: ts, value: v })
        .collect();

    UsageSummary {
        current,
        average: sum / samples.len() as f64,
        peak,
        threshold,
        timeline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn prom_result(
        labels: &[(&str, &str)],
        value: Option<f64>,
        values: &[(f64, f64)],
    ) -> PromResult {
        PromResult {
            metric: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            value: value.map(|v| (0.0, v.to_string())),
            values: if values.is_empty() {
                None
            } else {
                Some(values.iter().map(|&(t, v)| (t, v.to_string())).collect())
            },
        }
    }

    fn series(name: &str, samples: &[(i64, f64)], limit: Option<f64>) -> ResourceSeries {
        ResourceSeries {
            key: SeriesKey {
                namespace: "shop".to_string(),
                pod: format!("{}-pod", name),
                container: Some(name.to_string()),
            },
            samples: samples.to_vec(),
            limit,
        }
    }

    #[test]
    fn test_join_attaches_limits_by_labels() {
        let usage = vec![prom_result(
            &[("namespace", "shop"), ("pod", "api-0"), ("container", "api")],
            None,
            &[(100.0, 0.2)],
        )];
        let limits = vec![prom_result(
            &[("namespace", "shop"), ("pod", "api-0"), ("container", "api")],
            Some(0.5),
            &[],
        )];

        let joined = join_usage_with_limits(usage, &limits, true);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].limit, Some(0.5));
        assert!((joined[0].current_percent() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_join_ignores_nonpositive_limits() {
        let usage = vec![prom_result(
            &[("namespace", "shop"), ("pod", "api-0"), ("container", "api")],
            None,
            &[(100.0, 0.2)],
        )];
        let limits = vec![prom_result(
            &[("namespace", "shop"), ("pod", "api-0"), ("container", "api")],
            Some(0.0),
            &[],
        )];

        let joined = join_usage_with_limits(usage, &limits, true);
        assert_eq!(joined[0].limit, None);
        assert_eq!(joined[0].current_percent(), 0.0);
    }

    #[test]
    fn test_container_scenario_with_rising_usage() {
        // container at 0.2 cores now, 0.3 at peak, limit 0.5 cores
        let usage = vec![prom_result(
            &[("namespace", "shop"), ("pod", "api-0"), ("container", "api")],
            None,
            &[(100.0, 0.1), (160.0, 0.3), (220.0, 0.2)],
        )];
        let limits = vec![prom_result(
            &[("namespace", "shop"), ("pod", "api-0"), ("container", "api")],
            Some(0.5),
            &[],
        )];

        let joined = join_usage_with_limits(usage, &limits, true);
        let top = top_n(&joined, 5);
        assert_eq!(top[0].current_usage, 0.2);
        assert_eq!(top[0].peak_usage, 0.3);
        assert_eq!(top[0].name, "api");
        assert_eq!(top[0].pod, Some("api-0".to_string()));
    }

    #[test]
    fn test_top_n_returns_all_when_fewer_than_n() {
        let all = vec![
            series("a", &[(1, 0.5)], None),
            series("b", &[(1, 0.2)], None),
            series("c", &[(1, 0.9)], None),
        ];

        let top = top_n(&all, 5);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].name, "c");
        assert_eq!(top[1].name, "a");
        assert_eq!(top[2].name, "b");
    }

    #[test]
    fn test_top_n_is_idempotent_on_sorted_input() {
        let all = vec![
            series("a", &[(1, 0.5)], None),
            series("b", &[(1, 0.5)], None),
            series("c", &[(1, 0.5)], None),
        ];

        let first = top_n(&all, 5);
        let second = top_n(&all, 5);
        let names: Vec<&str> = first.iter().map(|c| c.name.as_str()).collect();
        let names_again: Vec<&str> = second.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, names_again);
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_threshold_breaches_need_a_limit() {
        let all = vec![
            // 80% of limit: breaches a 70% warning
            series("hot", &[(1, 0.4)], Some(0.5)),
            // no limit: huge raw usage must still never breach
            series("unlimited", &[(1, 40.0)], None),
            // 20% of limit: under threshold
            series("cool", &[(1, 0.1)], Some(0.5)),
        ];

        let breaches = threshold_breaches(&all, 70.0);
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].consumer.name, "hot");
        assert!((breaches[0].usage_percent - 80.0).abs() < 1e-9);
        assert_eq!(breaches[0].threshold, 70.0);
    }

    #[test]
    fn test_summarize_truncates_timeline() {
        let samples: Vec<(i64, f64)> = (0..50).map(|i| (i, i as f64)).collect();
        let summary = summarize(&samples, ThresholdPair { warning: 70.0, critical: 85.0 });

        assert_eq!(summary.timeline.len(), 20);
        assert_eq!(summary.timeline[0].timestamp, 30);
        assert_eq!(summary.current, 49.0);
        assert_eq!(summary.peak, 49.0);
        assert!((summary.average - 24.5).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_empty_samples() {
        let summary = summarize(&[], ThresholdPair { warning: 75.0, critical: 90.0 });
        assert_eq!(summary.current, 0.0);
        assert_eq!(summary.average, 0.0);
        assert_eq!(summary.peak, 0.0);
        assert!(summary.timeline.is_empty());
    }

    #[test]
    fn test_merge_samples_averages_pointwise() {
        let results = vec![
            prom_result(&[("instance", "a")], None, &[(10.0, 40.0), (20.0, 60.0)]),
            prom_result(&[("instance", "b")], None, &[(10.0, 20.0), (20.0, 80.0)]),
        ];
        assert_eq!(merge_samples(results), vec![(10, 30.0), (20, 70.0)]);
    }

    #[test]
    fn test_pod_level_query_rewrite() {
        let q = container_cpu_query(None);
        let pod_q = pod_level(&q);
        assert!(pod_q.ends_with("by (namespace,pod)"));
        assert!(!pod_q.contains("container)"));
    }

    #[test]
    fn test_node_filter_applied_to_queries() {
        let q = container_cpu_query(Some("worker-1"));
        assert!(q.contains("kubernetes_io_hostname=\"worker-1\""));

        let cpu = node_cpu_percent_query(Some("worker-1"));
        assert!(cpu.contains("instance=~\"worker-1.*\""));

        let unfiltered = node_memory_percent_query(None);
        assert!(unfiltered.contains("node_memory_MemAvailable_bytes /"));
    }

    #[test]
    fn test_top_consumer_wire_shape() {
        let ranked = top_and_breaches(&[series("api", &[(1, 0.4)], Some(0.5))], 70.0, Some("worker-1"));

        let json = serde_json::to_value(&ranked.top5[0]).unwrap();
        assert_eq!(json["trend"], "stable");
        assert_eq!(json["node"], "worker-1");
        assert_eq!(json["currentUsage"], 0.4);

        // without a node filter the field is omitted entirely
        let unfiltered = top_and_breaches(&[series("api", &[(1, 0.4)], None)], 70.0, None);
        let json = serde_json::to_value(&unfiltered.top5[0]).unwrap();
        assert!(json.get("node").is_none());
    }

    #[test]
    fn test_series_key_display_name() {
        let with_container = SeriesKey {
            namespace: "shop".to_string(),
            pod: "api-0".to_string(),
            container: Some("api".to_string()),
        };
        assert_eq!(with_container.display_name(), "api");

        let pod_only = SeriesKey {
            namespace: "shop".to_string(),
            pod: "api-0".to_string(),
            container: None,
        };
        assert_eq!(pod_only.display_name(), "api-0");
    }

    #[test]
    fn test_series_key_unknown_labels() {
        let result = PromResult { metric: HashMap::new(), value: None, values: None };
        let key = series_key(&result, true);
        assert_eq!(key.namespace, "unknown");
        assert_eq!(key.pod, "unknown");
        assert_eq!(key.container, None);
    }
}
