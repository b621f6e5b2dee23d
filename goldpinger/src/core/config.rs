use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "4" => Ok(IpVersion::V4),
            "6" => Ok(IpVersion::V6),
            other => anyhow::bail!("unknown IP version '{}': expected 4 or 6", other),
        }
    }

    /// Does `addr` belong to this address family? Unparseable input never
    /// matches.
    pub fn matches(&self, addr: &str) -> bool {
        match addr.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => *self == IpVersion::V4,
            Ok(IpAddr::V6(_)) => *self == IpVersion::V6,
            Err(_) => false,
        }
    }
}

/// Runtime configuration, frozen after start-up. Built once from the parsed
/// serve flags and threaded through the service state.
#[derive(Clone, Debug)]
pub struct Config {
    /// Period between membership refreshes and between individual pings.
    pub refresh_interval: Duration,
    /// Fractional jitter added to each prober's period (0 <= j <= 1).
    pub jitter_factor: f64,

    pub ping_timeout: Duration,
    pub check_timeout: Duration,
    pub check_all_timeout: Duration,

    pub dns_check_timeout: Duration,
    pub tcp_check_timeout: Duration,
    pub http_check_timeout: Duration,

    /// How many peers this instance pings; 0 means all.
    pub ping_number: usize,

    /// This instance's identity, used as the rendezvous key.
    pub pod_name: String,
    pub pod_ip: String,
    pub host_ip: String,
    /// When true, peer calls target hostIP instead of podIP.
    pub use_host_ip: bool,

    pub label_selector: String,
    pub namespace: String,
    pub ip_version: IpVersion,

    pub dns_hosts: Vec<String>,
    pub tcp_targets: Vec<String>,
    pub http_targets: Vec<String>,

    /// Report peers by node name instead of pod name.
    pub display_node_name: bool,
    /// TCP port used when calling other instances.
    pub client_port: u16,

    /// Instance label attached to every metric.
    pub hostname: String,
    pub static_file_path: Option<PathBuf>,
}

impl Config {
    pub fn has_external_targets(&self) -> bool {
        !self.dns_hosts.is_empty() || !self.tcp_targets.is_empty() || !self.http_targets.is_empty()
    }
}

/// Namespace this instance runs in, read from the service-account mount.
/// Empty when undetectable; the membership query then lists all namespaces
/// the credentials can see.
pub fn detect_namespace() -> String {
    match std::fs::read_to_string(NAMESPACE_FILE) {
        Ok(ns) => ns.trim().to_string(),
        Err(e) => {
            warn!("unable to determine namespace: {}", e);
            String::new()
        }
    }
}
