use tracing::warn;

use crate::prometheus::PrometheusClient;
use crate::types::{Config, ErrorBreakdown, TierStat};

/// Collects the four-tier 5xx breakdown. Each tier query runs concurrently;
/// a failed or disabled tier contributes zero, so this never fails as a
/// whole. Per-tier failures are logged as missing metrics, not errors.
pub async fn collect_5xx_breakdown(prom: &PrometheusClient, cfg: &Config) -> ErrorBreakdown {
    let tiers = &cfg.error_tiers;
    let (haproxy, gateway, application, downstream) = tokio::join!(
        tier_count(prom, tiers.haproxy, haproxy_query(), "haproxy"),
        tier_count(prom, tiers.gateway, gateway_query(), "gateway"),
        tier_count(prom, tiers.application, application_query(&cfg.app_namespace_regex), "application"),
        tier_count(prom, tiers.downstream, downstream_query(), "downstream"),
    );

    build_breakdown(haproxy, gateway, application, downstream)
}

async fn tier_count(prom: &PrometheusClient, enabled: bool, query: String, tier: &str) -> f64 {
    if !enabled {
        return 0.0;
    }
    match prom.query(&query).await {
        Ok(results) => results.first().map(|r| r.scalar()).unwrap_or(0.0),
        Err(e) => {
            warn!("{} 5xx metrics unavailable, counting zero: {:#}", tier, e);
            0.0
        }
    }
}

fn haproxy_query() -> String {
    "sum(rate(haproxy_backend_http_responses_total{code=~\"5..\"}[5m]))".to_string()
}

fn gateway_query() -> String {
    "sum(rate(istio_requests_total{source_workload=\"istio-ingressgateway\",response_code=~\"5..\"}[5m]))"
        .to_string()
}

fn application_query(namespace_regex: &str) -> String {
    format!(
        "sum(rate(istio_requests_total{{destination_service_namespace=~\"{}\",response_code=~\"5..\"}}[5m]))",
        namespace_regex
    )
}

fn downstream_query() -> String {
    "sum(rate(istio_requests_total{response_code=~\"5..\",response_flags=~\"UF|UO|DC|NR|UH\"}[5m]))"
        .to_string()
}

/// Builds the percentage view of the per-tier counts. Percentages carry one
/// decimal place; a zero total yields `"0"` for every tier.
pub fn build_breakdown(haproxy: f64, gateway: f64, application: f64, downstream: f64) -> ErrorBreakdown {
    let counts = [haproxy, gateway, application, downstream];
    let total: f64 = counts.iter().sum();
    let [h, g, a, d] = percentage_strings(&counts, total);

    ErrorBreakdown {
        haproxy: TierStat { count: haproxy, percentage: h },
        gateway: TierStat { count: gateway, percentage: g },
        application: TierStat { count: application, percentage: a },
        downstream: TierStat { count: downstream, percentage: d },
        total,
    }
}

/// One-decimal percentage strings, allocated largest-remainder over tenths
/// of a percent so rounding can never push the sum off 100.0.
fn percentage_strings(counts: &[f64; 4], total: f64) -> [String; 4] {
    if total <= 0.0 {
        return std::array::from_fn(|_| "0".to_string());
    }

    let exact: [f64; 4] = std::array::from_fn(|i| counts[i] / total * 1000.0);
    let mut tenths: [i64; 4] = std::array::from_fn(|i| exact[i].floor() as i64);

    let mut order: Vec<usize> = (0..4).collect();
    order.sort_by(|&i, &j| {
        let fi = exact[i] - exact[i].floor();
        let fj = exact[j] - exact[j].floor();
        fj.partial_cmp(&fi).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut leftover = 1000 - tenths.iter().sum::<i64>();
    for &i in &order {
        if leftover <= 0 {
            break;
        }
        tenths[i] += 1;
        leftover -= 1;
    }

    std::array::from_fn(|i| format!("{:.1}", tenths[i] as f64 / 10.0))
}
