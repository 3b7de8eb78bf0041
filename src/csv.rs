use chrono::{DateTime, SecondsFormat, Utc};

use crate::types::{ReportSnapshot, TopConsumer};
use crate::units::bytes_to_mebibytes;

/// UTF-8 byte order mark, prepended at the HTTP boundary so spreadsheet
/// tools detect the encoding of the Korean headers.
pub const UTF8_BOM: &str = "\u{feff}";

/// Renders the full monitoring snapshot as a sectioned CSV document.
/// Every section header is always emitted, even when its data collection
/// failed and the section body is empty.
pub fn generate_comprehensive_csv(snapshot: &ReportSnapshot) -> String {
    let mut csv = String::new();

    cluster_overview_section(&mut csv, snapshot);
    nodes_section(&mut csv, snapshot);
    resource_usage_section(&mut csv, snapshot);
    consumers_section(
        &mut csv,
        "=== Container CPU 사용량 Top 5 ===",
        "순위,Namespace,Pod,Container,현재 CPU 사용량(cores),피크 CPU 사용량(cores)",
        &snapshot.container_cpu.top5,
        Unit::Cores,
    );
    consumers_section(
        &mut csv,
        "=== Container Memory 사용량 Top 5 ===",
        "순위,Namespace,Pod,Container,현재 Memory 사용량(MB),피크 Memory 사용량(MB)",
        &snapshot.container_memory.top5,
        Unit::Mebibytes,
    );
    consumers_section(
        &mut csv,
        "=== Pod CPU 사용량 Top 5 ===",
        "순위,Namespace,Pod,현재 CPU 사용량(cores),피크 CPU 사용량(cores)",
        &snapshot.pod_cpu.top5,
        Unit::Cores,
    );
    consumers_section(
        &mut csv,
        "=== Pod Memory 사용량 Top 5 ===",
        "순위,Namespace,Pod,현재 Memory 사용량(MB),피크 Memory 사용량(MB)",
        &snapshot.pod_memory.top5,
        Unit::Mebibytes,
    );
    error_breakdown_section(&mut csv, snapshot);
    top_errors_section(&mut csv, snapshot);
    healthcheck_section(&mut csv, snapshot);

    csv
}

/// Commas become semicolons and newlines become spaces so a message can
/// never break the row structure.
pub fn csv_escape(message: &str) -> String {
    message.replace(',', ";").replace('\n', " ").replace('\r', "")
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn cluster_overview_section(csv: &mut String, snapshot: &ReportSnapshot) {
    let overview = &snapshot.cluster_overview;
    csv.push_str("=== 클러스터 개요 ===\n");
    csv.push_str("항목,값\n");
    csv.push_str(&format!("노드 총 개수,{}\n", overview.nodes.total));
    csv.push_str(&format!("노드 Ready 개수,{}\n", overview.nodes.ready));
    csv.push_str(&format!("Pod 총 개수,{}\n", overview.pods.total));
    csv.push_str(&format!("Pod Running 개수,{}\n", overview.pods.running));
    csv.push_str(&format!("Pod Failed 개수,{}\n", overview.pods.failed));
    csv.push_str(&format!("Pod Pending 개수,{}\n", overview.pods.pending));
    csv.push('\n');
}

fn nodes_section(csv: &mut String, snapshot: &ReportSnapshot) {
    csv.push_str("=== 노드 정보 ===\n");
    csv.push_str("노드명,IP,역할,상태,OS,Kernel,Container Runtime,Kubelet Version\n");
    for node in &snapshot.nodes {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            node.name,
            node.ip.as_deref().unwrap_or(""),
            node.role,
            node.status,
            node.os.as_deref().unwrap_or(""),
            node.kernel.as_deref().unwrap_or(""),
            node.container_runtime.as_deref().unwrap_or(""),
            node.kubelet_version.as_deref().unwrap_or(""),
        ));
    }
    csv.push('\n');
}

fn resource_usage_section(csv: &mut String, snapshot: &ReportSnapshot) {
    let usage = &snapshot.resource_usage;
    csv.push_str("=== 리소스 사용률 (시계열) ===\n");
    csv.push_str("시간,노드,CPU 사용률(%),Memory 사용률(%),CPU 평균(%),CPU 피크(%),Memory 평균(%),Memory 피크(%)\n");

    if usage.cpu.timeline.is_empty() {
        csv.push_str(&format!("{},{},0,0,0,0,0,0\n", iso(snapshot.period_start), snapshot.node));
    } else {
        for (index, point) in usage.cpu.timeline.iter().enumerate() {
            let memory_value = usage
                .memory
                .timeline
                .get(index)
                .map(|p| format!("{:.2}", p.value))
                .unwrap_or_else(|| "0".to_string());
            let timestamp = DateTime::<Utc>::from_timestamp(point.timestamp, 0)
                .map(iso)
                .unwrap_or_default();

            if index == 0 {
                csv.push_str(&format!(
                    "{},{},{:.2},{},{:.2},{:.2},{:.2},{:.2}\n",
                    timestamp,
                    snapshot.node,
                    point.value,
                    memory_value,
                    usage.cpu.average,
                    usage.cpu.peak,
                    usage.memory.average,
                    usage.memory.peak,
                ));
            } else {
                csv.push_str(&format!(
                    "{},{},{:.2},{},,,,\n",
                    timestamp, snapshot.node, point.value, memory_value,
                ));
            }
        }
    }
    csv.push('\n');
}

enum Unit {
    Cores,
    Mebibytes,
}

fn consumers_section(
    csv: &mut String,
    title: &str,
    header: &str,
    consumers: &[TopConsumer],
    unit: Unit,
) {
    csv.push_str(title);
    csv.push('\n');
    csv.push_str(header);
    csv.push('\n');

    for (index, consumer) in consumers.iter().enumerate() {
        let (current, peak) = match unit {
            Unit::Cores => (
                format!("{:.4}", consumer.current_usage),
                format!("{:.4}", consumer.peak_usage),
            ),
            Unit::Mebibytes => (
                format!("{:.2}", bytes_to_mebibytes(consumer.current_usage)),
                format!("{:.2}", bytes_to_mebibytes(consumer.peak_usage)),
            ),
        };
        match &consumer.pod {
            Some(pod) => csv.push_str(&format!(
                "{},{},{},{},{},{}\n",
                index + 1,
                consumer.namespace,
                pod,
                consumer.name,
                current,
                peak,
            )),
            None => csv.push_str(&format!(
                "{},{},{},{},{}\n",
                index + 1,
                consumer.namespace,
                consumer.name,
                current,
                peak,
            )),
        }
    }
    csv.push('\n');
}

fn error_breakdown_section(csv: &mut String, snapshot: &ReportSnapshot) {
    let breakdown = &snapshot.error_breakdown;
    csv.push_str("=== 5XX 에러 단계별 분류 ===\n");
    csv.push_str("단계,에러 수,비율(%)\n");
    csv.push_str(&format!("HAProxy,{},{}\n", breakdown.haproxy.count, breakdown.haproxy.percentage));
    csv.push_str(&format!("Gateway,{},{}\n", breakdown.gateway.count, breakdown.gateway.percentage));
    csv.push_str(&format!(
        "Application,{},{}\n",
        breakdown.application.count, breakdown.application.percentage
    ));
    csv.push_str(&format!(
        "Downstream,{},{}\n",
        breakdown.downstream.count, breakdown.downstream.percentage
    ));
    csv.push_str(&format!("전체,{},100.0\n", breakdown.total));
    csv.push('\n');
}

fn top_errors_section(csv: &mut String, snapshot: &ReportSnapshot) {
    csv.push_str("=== Top 10 에러 메시지 ===\n");
    csv.push_str("순위,에러 메시지,발생 횟수,Namespace,Service,최근 발생 시간\n");
    for (index, error) in snapshot.top_errors.iter().enumerate() {
        csv.push_str(&format!(
            "{},\"{}\",{},{},{},{}\n",
            index + 1,
            csv_escape(&error.message),
            error.count,
            error.namespace,
            error.service,
            iso(error.last_occurred),
        ));
    }
    csv.push('\n');
}

fn healthcheck_section(csv: &mut String, snapshot: &ReportSnapshot) {
    let healthcheck = &snapshot.healthcheck;
    csv.push_str("=== 헬스체크 상태 ===\n");
    csv.push_str(&format!("상태,{}\n", if healthcheck.has_errors { "Critical" } else { "Healthy" }));
    csv.push_str(&format!("체크된 Pod 수,{}\n", healthcheck.checked_pods));
    csv.push_str(&format!("에러 발생 Pod 수,{}\n", healthcheck.errors.len()));
    csv.push('\n');

    if !healthcheck.errors.is_empty() {
        csv.push_str("=== 헬스체크 에러 상세 ===\n");
        csv.push_str("Pod,Node,에러 메시지,발생 시간\n");
        for pod_errors in &healthcheck.errors {
            for error in &pod_errors.errors {
                csv.push_str(&format!(
                    "{},{},\"{}\",{}\n",
                    pod_errors.pod,
                    pod_errors.node,
                    csv_escape(&error.message),
                    error.timestamp,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakdown::build_breakdown;
    use crate::types::*;
    use chrono::TimeZone;

    const SECTION_HEADERS: &[&str] = &[
        "=== 클러스터 개요 ===",
        "=== 노드 정보 ===",
        "=== 리소스 사용률 (시계열) ===",
        "=== Container CPU 사용량 Top 5 ===",
        "=== Container Memory 사용량 Top 5 ===",
        "=== Pod CPU 사용량 Top 5 ===",
        "=== Pod Memory 사용량 Top 5 ===",
        "=== 5XX 에러 단계별 분류 ===",
        "=== Top 10 에러 메시지 ===",
        "=== 헬스체크 상태 ===",
    ];

    fn empty_snapshot() -> ReportSnapshot {
        let thresholds = ThresholdPair { warning: 70.0, critical: 85.0 };
        ReportSnapshot {
            node: "all".to_string(),
            period_start: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            period_end: Utc.timestamp_opt(1_700_003_600, 0).unwrap(),
            generated_at: Utc.timestamp_opt(1_700_003_700, 0).unwrap(),
            cluster_overview: ClusterOverview::default(),
            nodes: Vec::new(),
            resource_usage: ResourceUsage::empty(thresholds, thresholds),
            container_cpu: TopAndBreaches::default(),
            container_memory: TopAndBreaches::default(),
            pod_cpu: TopAndBreaches::default(),
            pod_memory: TopAndBreaches::default(),
            error_breakdown: ErrorBreakdown::default(),
            top_errors: Vec::new(),
            healthcheck: HealthcheckResult::default(),
        }
    }

    #[test]
    fn test_all_sections_present_when_everything_failed() {
        let csv = generate_comprehensive_csv(&empty_snapshot());
        for header in SECTION_HEADERS {
            assert!(csv.contains(header), "missing section: {}", header);
        }
        // degraded timeline still writes a zero row for the window start
        assert!(csv.contains(",all,0,0,0,0,0,0\n"));
    }

    #[test]
    fn test_error_breakdown_section_round_trips() {
        let mut snapshot = empty_snapshot();
        snapshot.error_breakdown = build_breakdown(10.0, 20.0, 30.0, 40.0);

        let csv = generate_comprehensive_csv(&snapshot);
        assert!(csv.contains("HAProxy,10,10.0\n"));
        assert!(csv.contains("Gateway,20,20.0\n"));
        assert!(csv.contains("Application,30,30.0\n"));
        assert!(csv.contains("Downstream,40,40.0\n"));
        assert!(csv.contains("전체,100,100.0\n"));
    }

    #[test]
    fn test_memory_top5_rendered_in_mebibytes() {
        let mut snapshot = empty_snapshot();
        snapshot.container_memory.top5 = vec![TopConsumer {
            name: "api".to_string(),
            namespace: "shop".to_string(),
            pod: Some("api-0".to_string()),
            node: None,
            current_usage: 536_870_912.0,
            peak_usage: 1_073_741_824.0,
            trend: "stable".to_string(),
        }];

        let csv = generate_comprehensive_csv(&snapshot);
        assert!(csv.contains("1,shop,api-0,api,512.00,1024.00\n"));
    }

    #[test]
    fn test_cpu_top5_rendered_in_cores() {
        let mut snapshot = empty_snapshot();
        snapshot.pod_cpu.top5 = vec![TopConsumer {
            name: "api-0".to_string(),
            namespace: "shop".to_string(),
            pod: None,
            node: None,
            current_usage: 0.2,
            peak_usage: 0.3,
            trend: "stable".to_string(),
        }];

        let csv = generate_comprehensive_csv(&snapshot);
        assert!(csv.contains("1,shop,api-0,0.2000,0.3000\n"));
    }

    #[test]
    fn test_error_messages_are_escaped() {
        let mut snapshot = empty_snapshot();
        snapshot.top_errors = vec![TopErrorMessage {
            message: "connection refused, retrying\nagain".to_string(),
            count: 7,
            namespace: "shop".to_string(),
            service: "checkout".to_string(),
            last_occurred: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }];

        let csv = generate_comprehensive_csv(&snapshot);
        assert!(csv.contains("1,\"connection refused; retrying again\",7,shop,checkout,"));
    }

    #[test]
    fn test_timeline_first_row_carries_aggregates() {
        let mut snapshot = empty_snapshot();
        let thresholds = ThresholdPair { warning: 70.0, critical: 85.0 };
        snapshot.resource_usage = ResourceUsage {
            cpu: UsageSummary {
                current: 42.0,
                average: 40.0,
                peak: 55.0,
                threshold: thresholds,
                timeline: vec![
                    TimelinePoint { timestamp: 1_700_000_000, value: 38.0 },
                    TimelinePoint { timestamp: 1_700_000_060, value: 42.0 },
                ],
            },
            memory: UsageSummary {
                current: 61.0,
                average: 60.0,
                peak: 66.0,
                threshold: thresholds,
                timeline: vec![
                    TimelinePoint { timestamp: 1_700_000_000, value: 59.0 },
                    TimelinePoint { timestamp: 1_700_000_060, value: 61.0 },
                ],
            },
        };

        let csv = generate_comprehensive_csv(&snapshot);
        assert!(csv.contains(",all,38.00,59.00,40.00,55.00,60.00,66.00\n"));
        assert!(csv.contains(",all,42.00,61.00,,,,\n"));
    }

    #[test]
    fn test_healthcheck_detail_section_only_when_errors() {
        let mut snapshot = empty_snapshot();
        let csv = generate_comprehensive_csv(&snapshot);
        assert!(!csv.contains("=== 헬스체크 에러 상세 ==="));

        snapshot.healthcheck = HealthcheckResult {
            has_errors: true,
            checked_pods: 2,
            errors: vec![PodHealthErrors {
                pod: "probe-0".to_string(),
                node: "worker-1".to_string(),
                errors: vec![ProbeLogError {
                    timestamp: "2024-05-01 10:00:05".to_string(),
                    message: "backend, down".to_string(),
                }],
            }],
        };

        let csv = generate_comprehensive_csv(&snapshot);
        assert!(csv.contains("상태,Critical\n"));
        assert!(csv.contains("=== 헬스체크 에러 상세 ==="));
        assert!(csv.contains("probe-0,worker-1,\"backend; down\",2024-05-01 10:00:05\n"));
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("a,b\nc\rd"), "a;b cd");
        assert_eq!(csv_escape("clean"), "clean");
    }
}
