use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::types::{LogEntry, TopErrorMessage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Thin client for the Loki HTTP query API.
#[derive(Debug, Clone)]
pub struct LokiClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct LokiResponse {
    status: String,
    #[serde(default)]
    data: Option<LokiData>,
}

#[derive(Debug, Deserialize)]
struct LokiData {
    #[serde(default)]
    result: Vec<LogStream>,
}

/// One stream from a Loki result: label set plus
/// `(nanosecond_timestamp, line)` value pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct LogStream {
    #[serde(default)]
    pub stream: HashMap<String, String>,
    #[serde(default)]
    pub values: Vec<(String, String)>,
}

impl LokiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build Loki HTTP client")?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), http })
    }

    /// Runs a LogQL range query. Timestamps are converted to nanoseconds
    /// here, at the adapter boundary.
    pub async fn query_range(
        &self,
        logql: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<LogStream>> {
        let url = format!(
            "{}/loki/api/v1/query_range?query={}&start={}&end={}&limit={}",
            self.base_url,
            urlencoding::encode(logql),
            start.timestamp_millis() as i128 * 1_000_000,
            end.timestamp_millis() as i128 * 1_000_000,
            limit
        );

        let response = self.http.get(&url).send().await.context("Loki request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Loki returned HTTP {}", status));
        }

        let body: LokiResponse = response
            .json()
            .await
            .context("Failed to parse Loki response")?;
        if body.status != "success" {
            return Err(anyhow!("Loki query failed with status {}", body.status));
        }

        Ok(body.data.map(|d| d.result).unwrap_or_default())
    }

    /// Fetches error-ish log lines for the configured application namespaces.
    pub async fn error_logs(
        &self,
        namespace_regex: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<LogStream>> {
        let logql = error_selector(namespace_regex);
        self.query_range(&logql, start, end, limit).await
    }

    /// Liveness probe against `/ready`, for the service health endpoint.
    pub async fn is_healthy(&self) -> bool {
        let url = format!("{}/ready", self.base_url);
        match self.http.get(&url).send().await {
            Ok(res) => res.status().is_success(),
            Err(_) => false,
        }
    }
}

pub fn error_selector(namespace_regex: &str) -> String {
    format!("{{namespace=~\"{}\"}} |~ \"(?i)(error|exception|fail)\"", namespace_regex)
}

/// Flattens streams into log entries, newest first. Lines that are JSON
/// objects contribute their `message`/`msg` and `level` fields; anything
/// else is kept verbatim.
pub fn parse_log_streams(streams: &[LogStream]) -> Vec<LogEntry> {
    let mut entries: Vec<LogEntry> = Vec::new();
    for stream in streams {
        let namespace = label(stream, "namespace");
        let service = service_label(stream);
        for (raw_ts, line) in &stream.values {
            let timestamp = match nanos_to_datetime(raw_ts) {
                Some(ts) => ts,
                None => continue,
            };
            let (message, level) = parse_line(line);
            entries.push(LogEntry {
                timestamp,
                message,
                level,
                namespace: namespace.clone(),
                service: service.clone(),
            });
        }
    }
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
}

/// Groups messages across streams by their trimmed, lowercased text (the
/// first occurrence's text is what gets displayed) and returns the `top_n`
/// most frequent, with the labels and timestamp of the most recent one.
pub fn top_error_messages(streams: &[LogStream], top_n: usize) -> Vec<TopErrorMessage> {
    let mut grouped: HashMap<String, TopErrorMessage> = HashMap::new();

    for stream in streams {
        let namespace = label(stream, "namespace");
        let service = service_label(stream);
        for (raw_ts, line) in &stream.values {
            let timestamp = match nanos_to_datetime(raw_ts) {
                Some(ts) => ts,
                None => continue,
            };
            let (message, _) = parse_line(line);
            let key = message.trim().to_lowercase();
            let entry = grouped.entry(key).or_insert_with(|| TopErrorMessage {
                message: message.trim().to_string(),
                count: 0,
                namespace: namespace.clone(),
                service: service.clone(),
                last_occurred: timestamp,
            });
            entry.count += 1;
            if timestamp > entry.last_occurred {
                entry.last_occurred = timestamp;
                entry.namespace = namespace.clone();
                entry.service = service.clone();
            }
        }
    }

    let mut ranked: Vec<TopErrorMessage> = grouped.into_values().collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
    ranked.truncate(top_n);
    ranked
}

fn label(stream: &LogStream, key: &str) -> String {
    stream.stream.get(key).cloned().unwrap_or_else(|| "unknown".to_string())
}

fn service_label(stream: &LogStream) -> String {
    stream
        .stream
        .get("app")
        .or_else(|| stream.stream.get("pod"))
        .cloned()
        .unwrap_or_else(|| "unknown".to_string())
}

fn nanos_to_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let nanos: i128 = raw.parse().ok()?;
    let millis = (nanos / 1_000_000) as i64;
    Utc.timestamp_millis_opt(millis).single()
}

fn parse_line(line: &str) -> (String, Option<String>) {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
        if let Some(obj) = value.as_object() {
            let message = obj
                .get("message")
                .or_else(|| obj.get("msg"))
                .and_then(|v| v.as_str())
                .unwrap_or(line)
                .to_string();
            let level = obj.get("level").and_then(|v| v.as_str()).map(|s| s.to_string());
            return (message, level);
        }
    }
    (line.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(labels: &[(&str, &str)], values: &[(&str, &str)]) -> LogStream {
        LogStream {
            stream: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            values: values.iter().map(|(t, l)| (t.to_string(), l.to_string())).collect(),
        }
    }

    #[test]
    fn test_parse_log_streams_sorted_newest_first() {
        let streams = vec![stream(
            &[("namespace", "shop"), ("app", "checkout")],
            &[
                ("1700000000000000000", "first error"),
                ("1700000060000000000", "second error"),
            ],
        )];

        let entries = parse_log_streams(&streams);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "second error");
        assert_eq!(entries[1].message, "first error");
        assert_eq!(entries[0].namespace, "shop");
        assert_eq!(entries[0].service, "checkout");
    }

    #[test]
    fn test_parse_log_streams_json_lines() {
        let streams = vec![stream(
            &[("namespace", "shop"), ("pod", "api-0")],
            &[(
                "1700000000000000000",
                r#"{"level":"error","message":"db connection refused"}"#,
            )],
        )];

        let entries = parse_log_streams(&streams);
        assert_eq!(entries[0].message, "db connection refused");
        assert_eq!(entries[0].level, Some("error".to_string()));
        assert_eq!(entries[0].service, "api-0");
    }

    #[test]
    fn test_top_error_messages_groups_and_ranks() {
        let streams = vec![
            stream(
                &[("namespace", "shop"), ("app", "checkout")],
                &[
                    ("1700000000000000000", "timeout talking to payments"),
                    ("1700000010000000000", "timeout talking to payments"),
                    ("1700000020000000000", "timeout talking to payments"),
                ],
            ),
            stream(
                &[("namespace", "shop"), ("app", "catalog")],
                &[
                    ("1700000005000000000", "index out of date"),
                    ("1700000015000000000", "cache miss storm"),
                ],
            ),
        ];

        let top = top_error_messages(&streams, 10);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].message, "timeout talking to payments");
        assert_eq!(top[0].count, 3);
        assert_eq!(top[0].service, "checkout");
        assert_eq!(top[1].count, 1);
        assert_eq!(top[2].count, 1);
    }

    #[test]
    fn test_top_error_messages_fold_case_and_whitespace_variants() {
        let streams = vec![stream(
            &[("namespace", "shop"), ("app", "checkout")],
            &[
                ("1700000000000000000", "Payment Timeout"),
                ("1700000010000000000", "  payment timeout "),
            ],
        )];

        let top = top_error_messages(&streams, 10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].count, 2);
        // the first occurrence's text is preserved for display
        assert_eq!(top[0].message, "Payment Timeout");
    }

    #[test]
    fn test_top_error_messages_truncates() {
        let values: Vec<(String, String)> = (0..15)
            .map(|i| (format!("170000000{:02}00000000", i), format!("error {}", i)))
            .collect();
        let streams = vec![LogStream {
            stream: HashMap::from([("namespace".to_string(), "shop".to_string())]),
            values,
        }];

        let top = top_error_messages(&streams, 10);
        assert_eq!(top.len(), 10);
    }

    #[test]
    fn test_top_error_messages_tracks_latest_occurrence() {
        let streams = vec![
            stream(&[("namespace", "a"), ("app", "old")], &[("1700000000000000000", "boom")]),
            stream(&[("namespace", "b"), ("app", "new")], &[("1700000100000000000", "boom")]),
        ];

        let top = top_error_messages(&streams, 5);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].count, 2);
        assert_eq!(top[0].namespace, "b");
        assert_eq!(top[0].service, "new");
    }

    #[tokio::test]
    async fn test_query_range_sends_nanoseconds() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/loki/api/v1/query_range")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("start".into(), "1700000000000000000".into()),
                mockito::Matcher::UrlEncoded("end".into(), "1700003600000000000".into()),
                mockito::Matcher::UrlEncoded("limit".into(), "500".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":{"resultType":"streams","result":[
                    {"stream":{"namespace":"shop"},"values":[["1700000001000000000","oops"]]}
                ]}}"#,
            )
            .create_async()
            .await;

        let client = LokiClient::new(&server.url()).unwrap();
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let end = Utc.timestamp_opt(1_700_003_600, 0).unwrap();
        let streams = client
            .query_range("{namespace=~\".+\"}", start, end, 500)
            .await
            .unwrap();

        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].values[0].1, "oops");
    }

    #[tokio::test]
    async fn test_http_failure_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/loki/api/v1/query_range")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let client = LokiClient::new(&server.url()).unwrap();
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let end = Utc.timestamp_opt(1_700_003_600, 0).unwrap();
        let err = client
            .query_range("{namespace=~\".+\"}", start, end, 100)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
