use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use tracing::info;

use crate::report::ReportType;
use crate::slack::report_file_name;
use crate::types::{Config, ReportSnapshot};

/// Sends the rendered PDF report to the configured team addresses through
/// the mail relay endpoint, as a raw RFC 822 message.
pub async fn send_report_email(
    http: &reqwest::Client,
    cfg: &Config,
    report_type: ReportType,
    snapshot: &ReportSnapshot,
    pdf: &[u8],
) -> Result<()> {
    let endpoint = cfg
        .email_api_url
        .as_deref()
        .ok_or_else(|| anyhow!("EMAIL_API_URL is not configured"))?;
    if cfg.team_emails.is_empty() {
        return Err(anyhow!("TEAM_EMAILS is not configured"));
    }

    let subject = format!(
        "[{}] 인프라 모니터링 리포트 {}",
        report_type.label_ko(),
        snapshot.period_start.format("%Y-%m-%d")
    );
    let file_name = report_file_name(report_type);
    let message = build_raw_mime(
        &cfg.email_from,
        &cfg.team_emails,
        &subject,
        &html_body(report_type, snapshot),
        pdf,
        &file_name,
    );

    let response = http
        .post(endpoint)
        .header(reqwest::header::CONTENT_TYPE, "message/rfc822")
        .body(message)
        .send()
        .await
        .context("Failed to send report email")?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("Mail relay returned status {}", status));
    }

    info!("Report email sent to {} recipients", cfg.team_emails.len());
    Ok(())
}

/// Builds a multipart/mixed message with an HTML body part and a base64
/// encoded PDF attachment.
pub fn build_raw_mime(
    from: &str,
    to: &[String],
    subject: &str,
    html: &str,
    pdf: &[u8],
    file_name: &str,
) -> Vec<u8> {
    let boundary = format!("----=_Part_{}", Utc::now().timestamp_millis());
    let mut lines: Vec<String> = vec![
        format!("From: {}", from),
        format!("To: {}", to.join(", ")),
        format!("Subject: {}", subject),
        "MIME-Version: 1.0".to_string(),
        format!("Content-Type: multipart/mixed; boundary=\"{}\"", boundary),
        String::new(),
        format!("--{}", boundary),
        "Content-Type: text/html; charset=utf-8".to_string(),
        "Content-Transfer-Encoding: 8bit".to_string(),
        String::new(),
        html.to_string(),
        String::new(),
        format!("--{}", boundary),
        "Content-Type: application/pdf".to_string(),
        "Content-Transfer-Encoding: base64".to_string(),
        format!("Content-Disposition: attachment; filename=\"{}\"", file_name),
        String::new(),
        BASE64.encode(pdf),
        format!("--{}--", boundary),
    ];
    lines.push(String::new());
    lines.join("\r\n").into_bytes()
}

fn html_body(report_type: ReportType, snapshot: &ReportSnapshot) -> String {
    let overview = &snapshot.cluster_overview;
    format!(
        "<html><body>\
         <h2>{} 인프라 모니터링 리포트</h2>\
         <p>기간: {} ~ {}</p>\
         <ul>\
         <li>노드: {} / {} Ready</li>\
         <li>Pod: {} Running / {} 전체</li>\
         <li>5XX 에러: {:.0}건</li>\
         </ul>\
         <p>상세 내용은 첨부된 PDF 리포트를 확인하세요.</p>\
         </body></html>",
        report_type.label_ko(),
        snapshot.period_start.format("%Y-%m-%d"),
        snapshot.period_end.format("%Y-%m-%d"),
        overview.nodes.ready,
        overview.nodes.total,
        overview.pods.running,
        overview.pods.total,
        snapshot.error_breakdown.total,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_mime_structure() {
        let message = build_raw_mime(
            "monitoring@example.com",
            &["a@example.com".to_string(), "b@example.com".to_string()],
            "[일일] 인프라 모니터링 리포트 2024-05-01",
            "<html><body>ok</body></html>",
            b"%PDF-1.4 fake",
            "infra-report-daily-2024-05-01.pdf",
        );
        let text = String::from_utf8(message).unwrap();

        assert!(text.starts_with("From: monitoring@example.com\r\n"));
        assert!(text.contains("To: a@example.com, b@example.com\r\n"));
        assert!(text.contains("Content-Type: multipart/mixed; boundary="));
        assert!(text.contains("Content-Type: application/pdf"));
        assert!(text.contains("Content-Transfer-Encoding: base64"));
        assert!(text.contains(&BASE64.encode(b"%PDF-1.4 fake")));
        // message ends with the closing boundary
        assert!(text.trim_end().ends_with("--"));
    }

    #[tokio::test]
    async fn test_send_requires_endpoint_and_recipients() {
        let http = crate::state::outbound_client().unwrap();
        let cfg = crate::config::load_config_with_env(&crate::config::MockEnvironment::new());
        let snapshot = sample_snapshot();

        let err = send_report_email(&http, &cfg, ReportType::Daily, &snapshot, b"%PDF")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("EMAIL_API_URL"));

        let env = crate::config::MockEnvironment::new()
            .with_var("EMAIL_API_URL", "http://relay.internal/send");
        let cfg = crate::config::load_config_with_env(&env);
        let err = send_report_email(&http, &cfg, ReportType::Daily, &snapshot, b"%PDF")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("TEAM_EMAILS"));
    }

    #[tokio::test]
    async fn test_send_posts_rfc822_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/send")
            .match_header("content-type", "message/rfc822")
            .with_status(202)
            .create_async()
            .await;

        let env = crate::config::MockEnvironment::new()
            .with_var("EMAIL_API_URL", format!("{}/send", server.url()))
            .with_var("TEAM_EMAILS", "team@example.com");
        let cfg = crate::config::load_config_with_env(&env);
        let http = crate::state::outbound_client().unwrap();

        send_report_email(&http, &cfg, ReportType::Daily, &sample_snapshot(), b"%PDF")
            .await
            .unwrap();
    }

    fn sample_snapshot() -> crate::types::ReportSnapshot {
        use crate::types::*;
        use chrono::TimeZone;
        let thresholds = ThresholdPair { warning: 70.0, critical: 85.0 };
        ReportSnapshot {
            node: "all".to_string(),
            period_start: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            period_end: Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).unwrap(),
            generated_at: Utc::now(),
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
}
