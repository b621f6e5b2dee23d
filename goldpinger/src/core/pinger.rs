//! The per-peer prober: one long-lived task per selected peer, issuing a
//! timed `GET /ping` every period and shipping the outcome to the collector.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use common::schemas::{PingResults, PodResult};
use common::time_utils::{elapsed_ms, utc_now};
use common::url_utils::peer_base_url;

use crate::core::membership::Peer;
use crate::core::state::AppState;

/// Message from a prober to the collector loop.
#[derive(Debug)]
pub enum PingerEvent {
    /// Outcome of one ping, tagged with the peer name.
    Result { name: String, result: PodResult },
    /// The prober exited; the store entry for this peer can be purged.
    Stopped { name: String },
}

pub struct Pinger {
    peer: Peer,
    state: AppState,
    results: mpsc::Sender<PingerEvent>,
}

impl Pinger {
    pub fn new(peer: Peer, state: AppState, results: mpsc::Sender<PingerEvent>) -> Self {
        Self {
            peer,
            state,
            results,
        }
    }

    /// One ping. Every outcome, including local setup failure, lands on the
    /// results channel so the store always reflects the latest attempt.
    pub async fn ping(&self) {
        self.state.metrics.count_call("made", "ping");

        let target = self.peer.target_ip(self.state.config.use_host_ip);
        if target.is_empty() {
            warn!(peer = %self.peer.name, "host or pod IP empty, can't make a call");
            self.state.metrics.count_error("ping");
            self.send_result(PodResult {
                ok: false,
                status_code: 500,
                response_time_ms: 0,
                error: Some("host or pod IP empty, can't make a call".to_string()),
                ping_time: utc_now(),
                pod_ip: self.peer.pod_ip.clone(),
                host_ip: self.peer.host_ip.clone(),
                response: None,
            })
            .await;
            return;
        }

        let url = format!(
            "{}/ping",
            peer_base_url(target, self.state.config.client_port)
        );
        let ping_time = utc_now();
        let start = Instant::now();

        let outcome = self.call_ping(&url).await;
        let response_time_ms = elapsed_ms(start);
        self.state.metrics.observe_peer_call(
            "ping",
            &self.peer.host_ip,
            &self.peer.pod_ip,
            start.elapsed().as_secs_f64(),
        );

        let result = match outcome {
            Ok(payload) => {
                debug!(peer = %self.peer.name, response_time_ms, "ping ok");
                PodResult {
                    ok: true,
                    status_code: 200,
                    response_time_ms,
                    error: None,
                    ping_time,
                    pod_ip: self.peer.pod_ip.clone(),
                    host_ip: self.peer.host_ip.clone(),
                    response: Some(payload),
                }
            }
            Err(e) => {
                warn!(peer = %self.peer.name, response_time_ms, "ping returned error: {e:#}");
                self.state.metrics.count_error("ping");
                PodResult {
                    ok: false,
                    status_code: 504,
                    response_time_ms,
                    error: Some(format!("{e:#}")),
                    ping_time,
                    pod_ip: self.peer.pod_ip.clone(),
                    host_ip: self.peer.host_ip.clone(),
                    response: None,
                }
            }
        };
        self.send_result(result).await;
    }

    async fn call_ping(&self, url: &str) -> anyhow::Result<PingResults> {
        let resp = self
            .state
            .http_client
            .get(url)
            .timeout(self.state.config.ping_timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("peer replied {}", resp.status());
        }
        Ok(resp.json::<PingResults>().await?)
    }

    async fn send_result(&self, result: PodResult) {
        let _ = self
            .results
            .send(PingerEvent::Result {
                name: self.peer.name.clone(),
                result,
            })
            .await;
    }

    /// Ping until the stop signal fires: sleep `initial_delay` (staggered
    /// start across newcomers), then ping every `period * (1 + U[0, jitter])`.
    /// A final `Stopped` message lets the collector purge the store entry.
    pub async fn run(
        self,
        initial_delay: Duration,
        period: Duration,
        jitter: f64,
        mut stop: watch::Receiver<bool>,
    ) {
        info!(
            peer = %self.peer.name,
            ?period,
            ?initial_delay,
            jitter,
            "starting pinger"
        );

        tokio::select! {
            _ = tokio::time::sleep(initial_delay) => {
                loop {
                    self.ping().await;
                    tokio::select! {
                        _ = tokio::time::sleep(jittered(period, jitter)) => {}
                        _ = stop.changed() => break,
                    }
                }
            }
            _ = stop.changed() => {}
        }

        info!(peer = %self.peer.name, "pinger stopped");
        let _ = self
            .results
            .send(PingerEvent::Stopped {
                name: self.peer.name,
            })
            .await;
    }
}

fn jittered(period: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return period;
    }
    let factor = 1.0 + rand::rng().random_range(0.0..jitter);
    period.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let period = Duration::from_millis(100);
        for _ in 0..100 {
            let d = jittered(period, 0.5);
            assert!(d >= period);
            assert!(d <= period.mul_f64(1.5));
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let period = Duration::from_millis(100);
        assert_eq!(jittered(period, 0.0), period);
    }
}
