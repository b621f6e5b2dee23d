//! Peer-facing check operations: the `/check` snapshot, the `/check_all`
//! fan-out, and the cluster-health reduction.

use std::collections::HashMap;
use std::time::Instant;

use futures_util::future::join_all;
use tracing::{debug, warn};

use common::schemas::{
    CheckAllHost, CheckAllPodResult, CheckAllResults, CheckResults, ClusterHealthResults,
    HealthCheckResults,
};
use common::time_utils::{elapsed_ns, utc_now};
use common::url_utils::peer_base_url;

use crate::core::membership::Peer;
use crate::core::probes::check_targets;
use crate::core::state::AppState;

/// The `/check` payload: a value-copy of the result store taken under the
/// lock, plus a fresh external-probe batch run outside it.
pub async fn check_neighbours(state: &AppState) -> CheckResults {
    let pod_results = state.store.snapshot();

    let probe_results = if state.config.has_external_targets() {
        check_targets(&state.config, &state.metrics).await
    } else {
        Default::default()
    };

    CheckResults {
        pod_results,
        probe_results,
    }
}

/// Fan a `/check` call out to every peer in `peers` concurrently and gather
/// the full matrix. A peer's failure is recorded in its own slot and never
/// discards another peer's response. The whole fan-out is bounded by the
/// check-all deadline: a call still in flight when it expires is recorded as
/// that peer's error.
pub async fn check_all_pods(state: &AppState, peers: HashMap<String, Peer>) -> CheckAllResults {
    let deadline = state.config.check_all_timeout;
    let calls = peers.values().map(|peer| async move {
        match tokio::time::timeout(deadline, check_one(state, peer)).await {
            Ok(response) => response,
            Err(_) => {
                warn!(peer = %peer.name, ?deadline, "check aborted: fan-out deadline exceeded");
                state.metrics.count_error("checkAll");
                (
                    peer.name.clone(),
                    CheckAllPodResult {
                        ok: false,
                        pod_ip: peer.pod_ip.clone(),
                        host_ip: peer.host_ip.clone(),
                        response: None,
                        error: Some(format!("fan-out deadline exceeded after {:?}", deadline)),
                    },
                )
            }
        }
    });
    let responses = join_all(calls).await;

    let mut result = CheckAllResults::default();
    for (name, response) in responses {
        result.hosts.push(CheckAllHost {
            name: name.clone(),
            pod_ip: response.pod_ip.clone(),
            host_ip: response.host_ip.clone(),
        });
        if let Some(payload) = &response.response {
            for (host, probes) in &payload.probe_results {
                result
                    .probe_results
                    .entry(host.clone())
                    .or_default()
                    .insert(name.clone(), probes.clone());
            }
        }
        result.responses.insert(name, response);
    }
    result
}

async fn check_one(state: &AppState, peer: &Peer) -> (String, CheckAllPodResult) {
    state.metrics.count_call("made", "check");

    let target = peer.target_ip(state.config.use_host_ip);
    if target.is_empty() {
        warn!(peer = %peer.name, "host or pod IP empty, can't make a call");
        state.metrics.count_error("checkAll");
        return (
            peer.name.clone(),
            CheckAllPodResult {
                ok: false,
                pod_ip: peer.pod_ip.clone(),
                host_ip: peer.host_ip.clone(),
                response: None,
                error: Some("host or pod IP empty, can't make a call".to_string()),
            },
        );
    }

    let url = format!("{}/check", peer_base_url(target, state.config.client_port));
    let start = Instant::now();
    let outcome = call_check(state, &url).await;

    let response = match outcome {
        Ok(payload) => {
            debug!(peer = %peer.name, "check ok");
            state.metrics.observe_peer_call(
                "check",
                &peer.host_ip,
                &peer.pod_ip,
                start.elapsed().as_secs_f64(),
            );
            CheckAllPodResult {
                ok: true,
                pod_ip: peer.pod_ip.clone(),
                host_ip: peer.host_ip.clone(),
                response: Some(payload),
                error: None,
            }
        }
        Err(e) => {
            warn!(peer = %peer.name, "check returned error: {e:#}");
            state.metrics.count_error("checkAll");
            CheckAllPodResult {
                ok: false,
                pod_ip: peer.pod_ip.clone(),
                host_ip: peer.host_ip.clone(),
                response: None,
                error: Some(format!("{e:#}")),
            }
        }
    };
    (peer.name.clone(), response)
}

async fn call_check(state: &AppState, url: &str) -> anyhow::Result<CheckResults> {
    let resp = state
        .http_client
        .get(url)
        .timeout(state.config.check_timeout)
        .send()
        .await?;
    if !resp.status().is_success() {
        anyhow::bail!("peer replied {}", resp.status());
    }
    Ok(resp.json::<CheckResults>().await?)
}

/// Reduce a fan-out over the selected peers to one verdict: the cluster is
/// healthy only when every peer answers, reports itself ok, and sees the
/// same set of host IPs this instance expects.
pub async fn check_cluster(state: &AppState) -> ClusterHealthResults {
    let generated_at = utc_now();
    let start = Instant::now();

    let peers = state.selected_peers().await;
    let mut expected: Vec<String> = peers.values().map(|p| p.host_ip.clone()).collect();
    expected.sort();

    let fan_out = check_all_pods(state, peers).await;

    let mut ok = !fan_out.responses.is_empty();
    let mut nodes_total = 0u32;
    let mut nodes_healthy = Vec::new();
    let mut nodes_unhealthy = Vec::new();

    for response in fan_out.responses.values() {
        if response.ok {
            nodes_healthy.push(response.host_ip.clone());
        } else {
            nodes_unhealthy.push(response.host_ip.clone());
            ok = false;
        }
        nodes_total += 1;

        let Some(payload) = &response.response else {
            ok = false;
            continue;
        };

        let mut observed: Vec<String> = payload
            .pod_results
            .values()
            .map(|r| r.host_ip.clone())
            .collect();
        observed.sort();
        if observed != expected {
            debug!(?observed, ?expected, "peer view does not match expectation");
            ok = false;
        }
    }

    nodes_healthy.sort();
    nodes_unhealthy.sort();

    ClusterHealthResults {
        ok,
        nodes_total,
        nodes_healthy,
        nodes_unhealthy,
        generated_at,
        duration_ns: elapsed_ns(start),
    }
}

/// Self health. The instance is healthy as long as it can produce this
/// response; peers judge each other through `/ping` and `/check` instead.
pub fn health_check() -> HealthCheckResults {
    let start = Instant::now();
    HealthCheckResults {
        ok: true,
        generated_at: utc_now(),
        duration_ns: elapsed_ns(start),
    }
}
