use std::collections::HashMap;

use crate::types::{Config, ErrorTiers};

/// Trait for abstracting environment variable access
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

/// Production implementation using std::env
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mock implementation for testing
#[derive(Debug, Default)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self { vars: HashMap::new() }
    }

    pub fn set_var<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_var(key, value);
        self
    }
}

impl EnvironmentProvider for MockEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn load_config() -> Config {
    load_config_with_env(&SystemEnvironment)
}

/// Every variable has a usable default; optional integrations (agent, Slack,
/// email) stay `None` until configured and are validated when first used.
pub fn load_config_with_env<E: EnvironmentProvider>(env: &E) -> Config {
    let port = parse_or(env, "PORT", 3011.0) as u16;

    let prometheus_url = trimmed_url(env, "PROMETHEUS_URL", "http://prometheus.monitoring:9090");
    let loki_url = trimmed_url(env, "LOKI_URL", "http://loki.monitoring:3100");

    let app_namespace_regex = env
        .get_var("APP_NAMESPACE_REGEX")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| ".+".to_string());

    let error_tiers = parse_error_tiers(env.get_var("ERROR_TIERS").as_deref());

    let team_emails: Vec<String> = env
        .get_var("TEAM_EMAILS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    Config {
        port,
        prometheus_url,
        loki_url,
        app_namespace_regex,
        cpu_warning_percent: parse_or(env, "CPU_WARNING_PERCENT", 70.0),
        cpu_critical_percent: parse_or(env, "CPU_CRITICAL_PERCENT", 85.0),
        memory_warning_percent: parse_or(env, "MEMORY_WARNING_PERCENT", 75.0),
        memory_critical_percent: parse_or(env, "MEMORY_CRITICAL_PERCENT", 90.0),
        error_rate_warning_percent: parse_or(env, "ERROR_RATE_WARNING_PERCENT", 0.5),
        error_rate_critical_percent: parse_or(env, "ERROR_RATE_CRITICAL_PERCENT", 2.0),
        latency_warning_ms: parse_or(env, "LATENCY_WARNING_MS", 500.0),
        latency_critical_ms: parse_or(env, "LATENCY_CRITICAL_MS", 2000.0),
        error_tiers,
        healthcheck_namespace: env
            .get_var("HEALTHCHECK_NAMESPACE")
            .unwrap_or_else(|| "monitoring".to_string()),
        healthcheck_selector: env
            .get_var("HEALTHCHECK_SELECTOR")
            .unwrap_or_else(|| "app=healthcheck".to_string()),
        healthcheck_container: non_empty(env.get_var("HEALTHCHECK_CONTAINER")),
        agent_url: non_empty(env.get_var("AGENT_URL")).map(|u| u.trim_end_matches('/').to_string()),
        agent_id: non_empty(env.get_var("AGENT_ID")),
        slack_api_url: trimmed_url(env, "SLACK_API_URL", "https://slack.com/api"),
        slack_bot_token: non_empty(env.get_var("SLACK_BOT_TOKEN")),
        slack_channel: non_empty(env.get_var("SLACK_CHANNEL")),
        slack_webhook_url: non_empty(env.get_var("SLACK_WEBHOOK_URL")),
        alert_interval_secs: parse_or(env, "ALERT_INTERVAL_SECS", 300.0) as u64,
        email_api_url: non_empty(env.get_var("EMAIL_API_URL")),
        email_from: env
            .get_var("EMAIL_FROM")
            .unwrap_or_else(|| "monitoring@example.com".to_string()),
        team_emails,
    }
}

fn parse_or<E: EnvironmentProvider>(env: &E, key: &str, default: f64) -> f64 {
    env.get_var(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

fn trimmed_url<E: EnvironmentProvider>(env: &E, key: &str, default: &str) -> String {
    env.get_var(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_error_tiers(raw: Option<&str>) -> ErrorTiers {
    let raw = match raw {
        Some(v) if !v.trim().is_empty() => v,
        _ => return ErrorTiers::default(),
    };
    let enabled: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    ErrorTiers {
        haproxy: enabled.iter().any(|t| t == "haproxy"),
        gateway: enabled.iter().any(|t| t == "gateway"),
        application: enabled.iter().any(|t| t == "application"),
        downstream: enabled.iter().any(|t| t == "downstream"),
    }
}
