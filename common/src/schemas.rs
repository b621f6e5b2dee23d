use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Payload of a `/ping` response. The boot time doubles as an uptime marker:
/// a peer that restarts reports a new value.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingResults {
    #[serde(rename = "bootTime", with = "time::serde::rfc3339")]
    pub boot_time: OffsetDateTime,
}

/// Latest observation of one peer, produced by its prober after every ping.
///
/// `ok` holds iff `error` is absent. `status_code` is 200 on success, 504 on
/// timeout or peer error, 500 on local setup error (empty target address).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PodResult {
    pub ok: bool,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "responseTimeMs")]
    pub response_time_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "pingTime", with = "time::serde::rfc3339")]
    pub ping_time: OffsetDateTime,
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    #[serde(rename = "hostIP")]
    pub host_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<PingResults>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProbeProtocol {
    Dns,
    Tcp,
    Http,
}

impl ProbeProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeProtocol::Dns => "dns",
            ProbeProtocol::Tcp => "tcp",
            ProbeProtocol::Http => "http",
        }
    }
}

/// Outcome of one external-target probe.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub protocol: ProbeProtocol,
    #[serde(rename = "responseTimeMs")]
    pub response_time_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// host -> probe outcomes for that host.
pub type ProbeResults = HashMap<String, Vec<ProbeResult>>;

/// Snapshot served by `/check`: the asynchronously collected per-peer results
/// plus a fresh external-probe batch.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckResults {
    #[serde(rename = "podResults", default)]
    pub pod_results: HashMap<String, PodResult>,
    #[serde(rename = "probeResults", default, skip_serializing_if = "HashMap::is_empty")]
    pub probe_results: ProbeResults,
}

/// One peer's answer to a fanned-out `/check` call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckAllPodResult {
    pub ok: bool,
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    #[serde(rename = "hostIP")]
    pub host_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CheckResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckAllHost {
    pub name: String,
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    #[serde(rename = "hostIP")]
    pub host_ip: String,
}

/// Aggregated view produced by the `/check_all` fan-out.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckAllResults {
    #[serde(default)]
    pub responses: HashMap<String, CheckAllPodResult>,
    #[serde(default)]
    pub hosts: Vec<CheckAllHost>,
    #[serde(rename = "probeResults", default, skip_serializing_if = "HashMap::is_empty")]
    pub probe_results: HashMap<String, HashMap<String, Vec<ProbeResult>>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClusterHealthResults {
    pub ok: bool,
    #[serde(rename = "nodesTotal")]
    pub nodes_total: u32,
    #[serde(rename = "nodesHealthy")]
    pub nodes_healthy: Vec<String>,
    #[serde(rename = "nodesUnhealthy")]
    pub nodes_unhealthy: Vec<String>,
    #[serde(rename = "generatedAt", with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    #[serde(rename = "durationNs")]
    pub duration_ns: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckResults {
    pub ok: bool,
    #[serde(rename = "durationNs")]
    pub duration_ns: i64,
    #[serde(rename = "generatedAt", with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}
