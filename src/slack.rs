use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tracing::{error, info};

use crate::report::ReportType;
use crate::types::{Config, ReportSnapshot};

/// Uploads a rendered PDF report to the configured Slack channel via
/// `files.upload`. Missing credentials are a configuration error, reported
/// to the caller rather than silently skipped.
pub async fn upload_report_to_slack(
    http: &reqwest::Client,
    cfg: &Config,
    report_type: ReportType,
    snapshot: &ReportSnapshot,
    pdf: &[u8],
) -> Result<()> {
    let token = cfg
        .slack_bot_token
        .as_deref()
        .ok_or_else(|| anyhow!("SLACK_BOT_TOKEN is not configured"))?;
    let channel = cfg
        .slack_channel
        .as_deref()
        .ok_or_else(|| anyhow!("SLACK_CHANNEL is not configured"))?;

    let file_name = report_file_name(report_type);
    let comment = build_comment(report_type, snapshot);

    let part = reqwest::multipart::Part::bytes(pdf.to_vec())
        .file_name(file_name.clone())
        .mime_str("application/pdf")
        .context("Failed to build PDF multipart body")?;
    let form = reqwest::multipart::Form::new()
        .text("channels", channel.to_string())
        .text("title", file_name.clone())
        .text("initial_comment", comment)
        .part("file", part);

    let response = http
        .post(format!("{}/files.upload", cfg.slack_api_url))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .context("Failed to send report to Slack")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!("Slack upload failed with status {}: {}", status, body);
        return Err(anyhow!("Slack API returned status {}", status));
    }

    // Slack reports application-level failures with HTTP 200
    let body: serde_json::Value = response
        .json()
        .await
        .context("Failed to parse Slack response")?;
    if !body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
        let reason = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        return Err(anyhow!("Slack upload rejected: {}", reason));
    }

    info!("Report {} uploaded to Slack channel {}", file_name, channel);
    Ok(())
}

pub fn report_file_name(report_type: ReportType) -> String {
    format!("infra-report-{}-{}.pdf", report_type, Utc::now().format("%Y-%m-%d"))
}

/// Short status message posted alongside the PDF.
pub fn build_comment(report_type: ReportType, snapshot: &ReportSnapshot) -> String {
    let health = if snapshot.healthcheck.has_errors { "⚠️ 점검 필요" } else { "✅ 정상" };
    format!(
        "{} 인프라 리포트 ({} ~ {})\n노드 {} / {} Ready · Pod {} Running · 5xx {:.0}건 · 헬스체크 {}",
        report_type.label_ko(),
        snapshot.period_start.format("%Y-%m-%d"),
        snapshot.period_end.format("%Y-%m-%d"),
        snapshot.cluster_overview.nodes.ready,
        snapshot.cluster_overview.nodes.total,
        snapshot.cluster_overview.pods.running,
        snapshot.error_breakdown.total,
        health,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::TimeZone;

    fn snapshot() -> ReportSnapshot {
        let thresholds = ThresholdPair { warning: 70.0, critical: 85.0 };
        ReportSnapshot {
            node: "all".to_string(),
            period_start: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            period_end: Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).unwrap(),
            generated_at: Utc.with_ymd_and_hms(2024, 5, 2, 1, 0, 0).unwrap(),
            cluster_overview: ClusterOverview {
                nodes: NodeCounts { total: 5, ready: 4 },
                pods: PodCounts { total: 80, running: 78, pending: 1, failed: 1 },
            },
            nodes: Vec::new(),
            resource_usage: ResourceUsage::empty(thresholds, thresholds),
            container_cpu: TopAndBreaches::default(),
            container_memory: TopAndBreaches::default(),
            pod_cpu: TopAndBreaches::default(),
            pod_memory: TopAndBreaches::default(),
            error_breakdown: crate::breakdown::build_breakdown(3.0, 0.0, 2.0, 0.0),
            top_errors: Vec::new(),
            healthcheck: HealthcheckResult::default(),
        }
    }

    #[test]
    fn test_comment_summarizes_snapshot() {
        let comment = build_comment(ReportType::Daily, &snapshot());
        assert!(comment.contains("일일 인프라 리포트"));
        assert!(comment.contains("2024-05-01"));
        assert!(comment.contains("노드 4 / 5 Ready"));
        assert!(comment.contains("5xx 5건"));
        assert!(comment.contains("정상"));
    }

    #[test]
    fn test_comment_flags_healthcheck_errors() {
        let mut snap = snapshot();
        snap.healthcheck.has_errors = true;
        let comment = build_comment(ReportType::Weekly, &snap);
        assert!(comment.contains("주간 인프라 리포트"));
        assert!(comment.contains("점검 필요"));
    }

    #[test]
    fn test_report_file_name_shape() {
        let name = report_file_name(ReportType::Monthly);
        assert!(name.starts_with("infra-report-monthly-"));
        assert!(name.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn test_upload_requires_token() {
        let http = crate::state::outbound_client().unwrap();
        let cfg = crate::config::load_config_with_env(&crate::config::MockEnvironment::new());
        let err = upload_report_to_slack(&http, &cfg, ReportType::Daily, &snapshot(), b"%PDF")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SLACK_BOT_TOKEN"));
    }

    #[tokio::test]
    async fn test_upload_posts_multipart_and_checks_ok() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/files.upload")
            .with_status(200)
            .with_body(r#"{"ok":true,"file":{"id":"F123"}}"#)
            .create_async()
            .await;

        let env = crate::config::MockEnvironment::new()
            .with_var("SLACK_API_URL", server.url())
            .with_var("SLACK_BOT_TOKEN", "xoxb-test")
            .with_var("SLACK_CHANNEL", "#infra-reports");
        let cfg = crate::config::load_config_with_env(&env);
        let http = crate::state::outbound_client().unwrap();

        upload_report_to_slack(&http, &cfg, ReportType::Daily, &snapshot(), b"%PDF")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upload_surfaces_slack_level_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/files.upload")
            .with_status(200)
            .with_body(r#"{"ok":false,"error":"invalid_auth"}"#)
            .create_async()
            .await;

        let env = crate::config::MockEnvironment::new()
            .with_var("SLACK_API_URL", server.url())
            .with_var("SLACK_BOT_TOKEN", "xoxb-bad")
            .with_var("SLACK_CHANNEL", "#infra-reports");
        let cfg = crate::config::load_config_with_env(&env);
        let http = crate::state::outbound_client().unwrap();

        let err = upload_report_to_slack(&http, &cfg, ReportType::Daily, &snapshot(), b"%PDF")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid_auth"));
    }
}
