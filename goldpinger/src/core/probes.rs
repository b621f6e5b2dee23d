//! Synchronous probes against external DNS/TCP/HTTP targets, used to tell
//! cluster-internal trouble apart from egress or resolver trouble.

use std::time::{Duration, Instant};

use anyhow::anyhow;
use tokio::net::TcpStream;
use tracing::warn;

use common::schemas::{ProbeProtocol, ProbeResult, ProbeResults};
use common::time_utils::elapsed_ms;
use common::url_utils::validate_probe_url;

use crate::core::config::Config;
use crate::core::metrics::Metrics;

/// One external target, tagged by protocol.
#[derive(Clone, Debug)]
pub enum Probe {
    Dns(String),
    Tcp(String),
    Http(String),
}

impl Probe {
    pub fn protocol(&self) -> ProbeProtocol {
        match self {
            Probe::Dns(_) => ProbeProtocol::Dns,
            Probe::Tcp(_) => ProbeProtocol::Tcp,
            Probe::Http(_) => ProbeProtocol::Http,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Probe::Dns(t) | Probe::Tcp(t) | Probe::Http(t) => t,
        }
    }

    pub async fn run(&self, timeout: Duration) -> anyhow::Result<()> {
        match self {
            Probe::Dns(host) => dns_probe(host, timeout).await,
            Probe::Tcp(addr) => tcp_probe(addr, timeout).await,
            Probe::Http(addr) => http_probe(addr, timeout).await,
        }
    }
}

/// Resolve the name under a deadline; a lookup that succeeds with no
/// addresses is still a failure.
async fn dns_probe(host: &str, timeout: Duration) -> anyhow::Result<()> {
    let addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((host, 0u16)))
        .await
        .map_err(|_| anyhow!("{} lookup timed out", host))??;
    if addrs.count() == 0 {
        return Err(anyhow!("{} was resolved to 0 ips", host));
    }
    Ok(())
}

/// Dial and immediately drop the connection.
async fn tcp_probe(addr: &str, timeout: Duration) -> anyhow::Result<()> {
    tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| anyhow!("{} dial timed out", addr))??;
    Ok(())
}

/// GET the target; success is exactly a 200. For https targets peer
/// certificates are not verified: this is a liveness test, not a trust
/// boundary.
async fn http_probe(addr: &str, timeout: Duration) -> anyhow::Result<()> {
    let url = validate_probe_url(addr)?;

    let client = if url.scheme() == "https" {
        reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?
    } else {
        reqwest::Client::new()
    };

    let resp = client.get(url).timeout(timeout).send().await?;
    if resp.status().as_u16() != 200 {
        return Err(anyhow!("{} returned non-200 resp: {}", addr, resp.status()));
    }
    Ok(())
}

/// Probe every configured external target, timing each one. Failures are
/// recorded in the result and counted; they never abort the batch.
pub async fn check_targets(config: &Config, metrics: &Metrics) -> ProbeResults {
    let probes = config
        .dns_hosts
        .iter()
        .map(|h| (Probe::Dns(h.clone()), config.dns_check_timeout))
        .chain(
            config
                .tcp_targets
                .iter()
                .map(|t| (Probe::Tcp(t.clone()), config.tcp_check_timeout)),
        )
        .chain(
            config
                .http_targets
                .iter()
                .map(|t| (Probe::Http(t.clone()), config.http_check_timeout)),
        );

    let mut results = ProbeResults::new();
    for (probe, timeout) in probes {
        let start = Instant::now();
        let error = match probe.run(timeout).await {
            Ok(()) => None,
            Err(e) => {
                warn!(target = %probe.target(), protocol = probe.protocol().as_str(), "probe failed: {e:#}");
                match probe.protocol() {
                    ProbeProtocol::Dns => metrics.count_dns_error(probe.target()),
                    other => metrics.count_error(other.as_str()),
                }
                Some(format!("{e:#}"))
            }
        };

        results
            .entry(probe.target().to_string())
            .or_default()
            .push(ProbeResult {
                protocol: probe.protocol(),
                response_time_ms: elapsed_ms(start),
                error,
            });
    }
    results
}
