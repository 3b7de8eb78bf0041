use crate::report::ReportType;
use crate::types::{ReportSnapshot, TopAndBreaches, UsageSummary};
use crate::units::bytes_to_mebibytes;

const STYLE: &str = r#"
body { font-family: 'Malgun Gothic', 'Apple SD Gothic Neo', sans-serif; color: #1f2933; margin: 0; }
h1 { font-size: 22px; border-bottom: 3px solid #3b82f6; padding-bottom: 8px; }
h2 { font-size: 16px; margin-top: 28px; color: #1d4ed8; }
table { width: 100%; border-collapse: collapse; margin: 10px 0; font-size: 12px; }
th, td { border: 1px solid #d1d5db; padding: 6px 8px; text-align: left; }
th { background: #eff6ff; }
.meta { color: #6b7280; font-size: 12px; }
.ok { color: #059669; font-weight: bold; }
.bad { color: #dc2626; font-weight: bold; }
.analysis { background: #f9fafb; border: 1px solid #e5e7eb; border-radius: 6px; padding: 14px; font-size: 13px; white-space: pre-wrap; }
canvas { max-width: 100%; }
"#;

/// Renders the fully local report document, used when the analysis agent
/// is not configured or unreachable.
pub fn render_template(report_type: ReportType, snapshot: &ReportSnapshot) -> String {
    document(report_type, snapshot, None)
}

/// Wraps the agent's narrative into the report shell, ahead of the data
/// sections.
pub fn wrap_agent_analysis(
    report_type: ReportType,
    snapshot: &ReportSnapshot,
    analysis: &str,
) -> String {
    document(report_type, snapshot, Some(analysis))
}

fn document(report_type: ReportType, snapshot: &ReportSnapshot, analysis: Option<&str>) -> String {
    let mut body = String::new();

    body.push_str(&format!(
        "<h1>{} 인프라 모니터링 리포트</h1>\n<p class=\"meta\">기간: {} ~ {} · 대상: {} · 생성: {}</p>\n",
        report_type.label_ko(),
        snapshot.period_start.format("%Y-%m-%d %H:%M"),
        snapshot.period_end.format("%Y-%m-%d %H:%M"),
        snapshot.node,
        snapshot.generated_at.format("%Y-%m-%d %H:%M"),
    ));

    if let Some(analysis) = analysis {
        body.push_str("<h2>분석 요약</h2>\n");
        body.push_str(&format!("<div class=\"analysis\">{}</div>\n", escape(analysis)));
    }

    overview_section(&mut body, snapshot);
    nodes_section(&mut body, snapshot);
    usage_section(&mut body, snapshot);
    top_section(&mut body, "Container CPU Top 5", &snapshot.container_cpu, Unit::Cores);
    top_section(&mut body, "Container Memory Top 5", &snapshot.container_memory, Unit::Mebibytes);
    top_section(&mut body, "Pod CPU Top 5", &snapshot.pod_cpu, Unit::Cores);
    top_section(&mut body, "Pod Memory Top 5", &snapshot.pod_memory, Unit::Mebibytes);
    errors_section(&mut body, snapshot);
    healthcheck_section(&mut body, snapshot);

    format!(
        "<!DOCTYPE html>\n<html lang=\"ko\">\n<head>\n<meta charset=\"utf-8\">\n<style>{}</style>\n</head>\n<body>\n{}{}</body>\n</html>\n",
        STYLE,
        body,
        chart_script(snapshot),
    )
}

fn overview_section(body: &mut String, snapshot: &ReportSnapshot) {
    let overview = &snapshot.cluster_overview;
    body.push_str("<h2>클러스터 개요</h2>\n<table>\n");
    body.push_str("<tr><th>노드 (Ready/전체)</th><th>Pod 전체</th><th>Running</th><th>Pending</th><th>Failed</th></tr>\n");
    body.push_str(&format!(
        "<tr><td>{} / {}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n</table>\n",
        overview.nodes.ready,
        overview.nodes.total,
        overview.pods.total,
        overview.pods.running,
        overview.pods.pending,
        overview.pods.failed,
    ));
}

fn nodes_section(body: &mut String, snapshot: &ReportSnapshot) {
    if snapshot.nodes.is_empty() {
        return;
    }
    body.push_str("<h2>노드 정보</h2>\n<table>\n");
    body.push_str("<tr><th>노드</th><th>IP</th><th>역할</th><th>상태</th><th>CPU(cores)</th><th>Memory(GiB)</th><th>Kubelet</th></tr>\n");
    for node in &snapshot.nodes {
        let status_class = if node.status == "Ready" { "ok" } else { "bad" };
        let cpu = node
            .cpu_capacity_cores
            .map(|v| format!("{:.0}", v))
            .unwrap_or_else(|| "-".to_string());
        let memory = node
            .memory_capacity_bytes
            .map(|v| format!("{:.1}", v / (1024.0 * 1024.0 * 1024.0)))
            .unwrap_or_else(|| "-".to_string());
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&node.name),
            node.ip.as_deref().unwrap_or("-"),
            node.role,
            status_class,
            node.status,
            cpu,
            memory,
            node.kubelet_version.as_deref().unwrap_or("-"),
        ));
    }
    body.push_str("</table>\n");
}

fn usage_section(body: &mut String, snapshot: &ReportSnapshot) {
    body.push_str("<h2>리소스 사용률</h2>\n<table>\n");
    body.push_str("<tr><th></th><th>현재(%)</th><th>평균(%)</th><th>피크(%)</th><th>경고 임계값(%)</th></tr>\n");
    usage_row(body, "CPU", &snapshot.resource_usage.cpu);
    usage_row(body, "Memory", &snapshot.resource_usage.memory);
    body.push_str("</table>\n<canvas id=\"usage-chart\" height=\"120\"></canvas>\n");
}

fn usage_row(body: &mut String, label: &str, summary: &UsageSummary) {
    body.push_str(&format!(
        "<tr><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.0}</td></tr>\n",
        label, summary.current, summary.average, summary.peak, summary.threshold.warning,
    ));
}

enum Unit {
    Cores,
    Mebibytes,
}

fn top_section(body: &mut String, title: &str, data: &TopAndBreaches, unit: Unit) {
    body.push_str(&format!("<h2>{}</h2>\n", title));
    if data.top5.is_empty() {
        body.push_str("<p class=\"meta\">수집된 데이터가 없습니다.</p>\n");
        return;
    }

    let (current_header, peak_header) = match unit {
        Unit::Cores => ("현재(cores)", "피크(cores)"),
        Unit::Mebibytes => ("현재(MB)", "피크(MB)"),
    };
    body.push_str(&format!(
        "<table>\n<tr><th>#</th><th>Namespace</th><th>이름</th><th>{}</th><th>{}</th></tr>\n",
        current_header, peak_header,
    ));
    for (index, consumer) in data.top5.iter().enumerate() {
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
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            index + 1,
            escape(&consumer.namespace),
            escape(&consumer.name),
            current,
            peak,
        ));
    }
    body.push_str("</table>\n");

    if !data.over_threshold.is_empty() {
        body.push_str("<p class=\"bad\">임계값 초과:</p>\n<ul>\n");
        for breach in &data.over_threshold {
            body.push_str(&format!(
                "<li>{}/{} — {:.1}% (임계값 {:.0}%)</li>\n",
                escape(&breach.consumer.namespace),
                escape(&breach.consumer.name),
                breach.usage_percent,
                breach.threshold,
            ));
        }
        body.push_str("</ul>\n");
    }
}

fn errors_section(body: &mut String, snapshot: &ReportSnapshot) {
    let breakdown = &snapshot.error_breakdown;
    body.push_str("<h2>5XX 에러 단계별 분류</h2>\n<table>\n");
    body.push_str("<tr><th>단계</th><th>에러 수</th><th>비율(%)</th></tr>\n");
    for (label, stat) in [
        ("HAProxy", &breakdown.haproxy),
        ("Gateway", &breakdown.gateway),
        ("Application", &breakdown.application),
        ("Downstream", &breakdown.downstream),
    ] {
        body.push_str(&format!(
            "<tr><td>{}</td><td>{:.1}</td><td>{}</td></tr>\n",
            label, stat.count, stat.percentage,
        ));
    }
    body.push_str(&format!("<tr><th>전체</th><th>{:.1}</th><th>100.0</th></tr>\n</table>\n", breakdown.total));

    if !snapshot.top_errors.is_empty() {
        body.push_str("<h2>Top 에러 메시지</h2>\n<table>\n");
        body.push_str("<tr><th>#</th><th>메시지</th><th>횟수</th><th>Namespace</th><th>Service</th></tr>\n");
        for (index, error) in snapshot.top_errors.iter().enumerate() {
            body.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                index + 1,
                escape(&error.message),
                error.count,
                escape(&error.namespace),
                escape(&error.service),
            ));
        }
        body.push_str("</table>\n");
    }
}

fn healthcheck_section(body: &mut String, snapshot: &ReportSnapshot) {
    let healthcheck = &snapshot.healthcheck;
    body.push_str("<h2>헬스체크</h2>\n");
    if healthcheck.has_errors {
        body.push_str(&format!(
            "<p class=\"bad\">Critical — {}개 Pod에서 에러 감지 (검사 대상 {}개)</p>\n<table>\n<tr><th>Pod</th><th>Node</th><th>메시지</th><th>시간</th></tr>\n",
            healthcheck.errors.len(),
            healthcheck.checked_pods,
        ));
        for pod_errors in &healthcheck.errors {
            for error in &pod_errors.errors {
                body.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                    escape(&pod_errors.pod),
                    escape(&pod_errors.node),
                    escape(&error.message),
                    error.timestamp,
                ));
            }
        }
        body.push_str("</table>\n");
    } else {
        body.push_str(&format!(
            "<p class=\"ok\">Healthy — 검사 대상 Pod {}개, 에러 없음</p>\n",
            healthcheck.checked_pods,
        ));
    }
}

/// Inline timeline chart drawn on a bare canvas, so the PDF render has no
/// external asset dependency.
fn chart_script(snapshot: &ReportSnapshot) -> String {
    let cpu: Vec<f64> = snapshot
        .resource_usage
        .cpu
        .timeline
        .iter()
        .map(|p| p.value)
        .collect();
    let memory: Vec<f64> = snapshot
        .resource_usage
        .memory
        .timeline
        .iter()
        .map(|p| p.value)
        .collect();
    if cpu.is_empty() && memory.is_empty() {
        return String::new();
    }

    format!(
        r#"<script>
(function() {{
  var canvas = document.getElementById('usage-chart');
  if (!canvas) return;
  var ctx = canvas.getContext('2d');
  var w = canvas.width = canvas.offsetWidth || 700;
  var h = canvas.height;
  var series = [{{ data: {cpu:?}, color: '#3b82f6' }}, {{ data: {memory:?}, color: '#ef4444' }}];
  series.forEach(function(s) {{
    if (s.data.length < 2) return;
    ctx.beginPath();
    ctx.strokeStyle = s.color;
    s.data.forEach(function(v, i) {{
      var x = i / (s.data.length - 1) * w;
      var y = h - (Math.min(v, 100) / 100) * h;
      i === 0 ? ctx.moveTo(x, y) : ctx.lineTo(x, y);
    }});
    ctx.stroke();
  }});
}})();
</script>
"#
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
