use anyhow::{anyhow, Result};
use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{ListParams, LogParams};
use kube::{Api, Client};
use tracing::warn;

use crate::types::{
    ClusterOverview, Config, HealthcheckResult, NodeCounts, NodeInfo, PodCounts,
    PodHealthErrors, ProbeLogError,
};
use crate::units::{normalize_cpu_cores, normalize_memory_bytes};

/// Cluster API access. Connection failure at startup degrades to an
/// unavailable handle instead of aborting, so Prometheus- and Loki-backed
/// endpoints keep working outside a cluster.
#[derive(Clone)]
pub struct ClusterApi {
    client: Option<Client>,
}

impl ClusterApi {
    pub async fn connect() -> Self {
        match Client::try_default().await {
            Ok(client) => Self { client: Some(client) },
            Err(e) => {
                warn!("Kubernetes client unavailable, cluster endpoints disabled: {}", e);
                Self { client: None }
            }
        }
    }

    pub fn disconnected() -> Self {
        Self { client: None }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| anyhow!("Kubernetes cluster API is not available"))
    }

    pub async fn is_healthy(&self) -> bool {
        match self.client() {
            Ok(client) => client.apiserver_version().await.is_ok(),
            Err(_) => false,
        }
    }

    /// Counts nodes by readiness and pods by phase across the cluster.
    pub async fn cluster_overview(&self) -> Result<ClusterOverview> {
        let client = self.client()?;

        let node_api: Api<Node> = Api::all(client.clone());
        let pod_api: Api<Pod> = Api::all(client.clone());
        let params = ListParams::default();
        let (nodes, pods) = tokio::join!(node_api.list(&params), pod_api.list(&params));
        let nodes = nodes?;
        let pods = pods?;

        let mut node_counts = NodeCounts { total: nodes.items.len(), ready: 0 };
        for node in &nodes.items {
            if node_is_ready(node) {
                node_counts.ready += 1;
            }
        }

        let mut pod_counts = PodCounts { total: pods.items.len(), ..Default::default() };
        for pod in &pods.items {
            match pod_phase(pod) {
                "Running" => pod_counts.running += 1,
                "Pending" => pod_counts.pending += 1,
                "Failed" => pod_counts.failed += 1,
                _ => {}
            }
        }

        Ok(ClusterOverview { nodes: node_counts, pods: pod_counts })
    }

    /// Lists nodes with address, role and system info for the report's
    /// node inventory table.
    pub async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        let client = self.client()?;
        let node_api: Api<Node> = Api::all(client.clone());
        let nodes = node_api.list(&ListParams::default()).await?;

        Ok(nodes.items.iter().filter_map(node_info).collect())
    }

    /// Tails the healthcheck probe pods' logs and reports recent failure
    /// lines. Per-pod log fetch errors are skipped so one broken pod does
    /// not hide the others.
    pub async fn healthcheck_status(&self, cfg: &Config) -> Result<HealthcheckResult> {
        let client = self.client()?;
        let pod_api: Api<Pod> = Api::namespaced(client.clone(), &cfg.healthcheck_namespace);
        let pods = pod_api
            .list(&ListParams::default().labels(&cfg.healthcheck_selector))
            .await?;

        let log_params = LogParams {
            tail_lines: Some(100),
            container: cfg.healthcheck_container.clone(),
            ..Default::default()
        };

        let mut result = HealthcheckResult::default();
        for pod in &pods.items {
            let pod_name = match pod.metadata.name.as_deref() {
                Some(name) => name,
                None => continue,
            };
            result.checked_pods += 1;

            let logs = match pod_api.logs(pod_name, &log_params).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!("Failed to read logs from healthcheck pod {}: {}", pod_name, e);
                    continue;
                }
            };

            let errors = scan_probe_logs(&logs);
            if !errors.is_empty() {
                result.errors.push(PodHealthErrors {
                    pod: pod_name.to_string(),
                    node: pod
                        .spec
                        .as_ref()
                        .and_then(|s| s.node_name.clone())
                        .unwrap_or_else(|| "unknown".to_string()),
                    errors,
                });
            }
        }

        result.has_errors = !result.errors.is_empty();
        Ok(result)
    }
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

fn node_info(node: &Node) -> Option<NodeInfo> {
    let name = node.metadata.name.clone()?;
    let status = node.status.as_ref();

    let ip = status
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addrs| addrs.iter().find(|a| a.type_ == "InternalIP"))
        .map(|a| a.address.clone());

    let role = node
        .metadata
        .labels
        .as_ref()
        .map(|labels| {
            if labels.contains_key("node-role.kubernetes.io/control-plane")
                || labels.contains_key("node-role.kubernetes.io/master")
            {
                "control-plane".to_string()
            } else {
                "worker".to_string()
            }
        })
        .unwrap_or_else(|| "worker".to_string());

    let node_status = if node_is_ready(node) { "Ready" } else { "NotReady" };
    let system = status.and_then(|s| s.node_info.as_ref());

    let capacity = status.and_then(|s| s.capacity.as_ref());
    let cpu_capacity_cores = capacity
        .and_then(|c| c.get("cpu"))
        .map(|q| normalize_cpu_cores(&q.0))
        .filter(|&v| v > 0.0);
    let memory_capacity_bytes = capacity
        .and_then(|c| c.get("memory"))
        .map(|q| normalize_memory_bytes(&q.0))
        .filter(|&v| v > 0.0);

    Some(NodeInfo {
        name,
        ip,
        role,
        status: node_status.to_string(),
        os: system.map(|i| i.os_image.clone()),
        kernel: system.map(|i| i.kernel_version.clone()),
        container_runtime: system.map(|i| i.container_runtime_version.clone()),
        kubelet_version: system.map(|i| i.kubelet_version.clone()),
        cpu_capacity_cores,
        memory_capacity_bytes,
    })
}

const FAILURE_MARKERS: &[&str] = &["ERROR", "CRITICAL", "FAIL", "DOWN"];
const FAILURE_MARKER_KO: &str = "실패";

/// Scans tailed probe logs for failure lines and keeps the last ten.
pub fn scan_probe_logs(logs: &str) -> Vec<ProbeLogError> {
    let mut errors: Vec<ProbeLogError> = logs
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            marker_position(line).map(|(idx, len)| ProbeLogError {
                timestamp: extract_bracketed_timestamp(line)
                    .unwrap_or_else(|| Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
                message: extract_message(line, idx, len),
            })
        })
        .collect();

    if errors.len() > 10 {
        errors.drain(..errors.len() - 10);
    }
    errors
}

/// Byte position and length of the first failure marker. ASCII markers are
/// matched case-insensitively; to_ascii_uppercase preserves byte offsets.
fn marker_position(line: &str) -> Option<(usize, usize)> {
    let upper = line.to_ascii_uppercase();
    for marker in FAILURE_MARKERS {
        if let Some(idx) = upper.find(marker) {
            return Some((idx, marker.len()));
        }
    }
    line.find(FAILURE_MARKER_KO)
        .map(|idx| (idx, FAILURE_MARKER_KO.len()))
}

fn extract_message(line: &str, marker_idx: usize, marker_len: usize) -> String {
    let rest = line[marker_idx + marker_len..]
        .trim_start_matches([':', '-', ']', ' '])
        .trim();
    if rest.is_empty() {
        line.to_string()
    } else {
        rest.to_string()
    }
}

/// Extracts a leading `[YYYY-MM-DD HH:MM:SS]` timestamp if the line has one.
fn extract_bracketed_timestamp(line: &str) -> Option<String> {
    let open = line.find('[')?;
    let close = line[open..].find(']')? + open;
    let candidate = &line[open + 1..close];
    if is_datetime_shaped(candidate) {
        Some(candidate.to_string())
    } else {
        None
    }
}

fn is_datetime_shaped(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 19 {
        return false;
    }
    bytes.iter().enumerate().all(|(i, &b)| match i {
        4 | 7 => b == b'-',
        10 => b == b' ',
        13 | 16 => b == b':',
        _ => b.is_ascii_digit(),
    })
}
