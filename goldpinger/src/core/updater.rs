//! Prober supervision: a reconcile loop that diffs the selected peer set
//! against the running probers, and a collector loop that is the sole
//! writer of the result store.

use std::collections::HashMap;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::membership::Peer;
use crate::core::pinger::{Pinger, PingerEvent};
use crate::core::state::AppState;

struct RunningProber {
    peer: Peer,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Run the updater until `shutdown` fires. With a zero refresh interval no
/// probers are started and the result store stays empty.
pub async fn run(state: AppState, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    if state.config.refresh_interval.is_zero() {
        info!("not creating updater, refresh interval is zero");
        return Ok(());
    }

    let initial = state.selected_peers().await;
    info!(peers = initial.len(), "got initial peer selection");

    // Each prober produces at most one message per period and the collector
    // drains in constant time, so this capacity never fills in steady state.
    // If the collector stalls, probers block on send.
    let (tx, rx) = mpsc::channel(initial.len().max(1));
    let collector = tokio::spawn(collect_results(state.clone(), rx));

    reconcile_loop(state, initial, tx, shutdown).await;

    // The channel sender is gone; the collector drains what is left and exits.
    let _ = collector.await;
    Ok(())
}

/// Task A: every refresh interval, compare the latest selection against the
/// running probers, tear down the departed, start the new, staggered.
async fn reconcile_loop(
    state: AppState,
    initial: HashMap<String, Peer>,
    tx: mpsc::Sender<PingerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pingers: HashMap<String, RunningProber> = HashMap::new();
    let mut latest = initial;

    loop {
        reconcile(&state, &mut pingers, &latest, &tx);

        tokio::select! {
            _ = tokio::time::sleep(state.config.refresh_interval) => {}
            _ = shutdown.changed() => break,
        }

        latest = state.selected_peers().await;
    }

    info!(probers = pingers.len(), "updater shutting down");
    for (_, prober) in pingers {
        let _ = prober.stop.send(true);
        let _ = prober.handle.await;
    }
}

fn reconcile(
    state: &AppState,
    pingers: &mut HashMap<String, RunningProber>,
    latest: &HashMap<String, Peer>,
    tx: &mpsc::Sender<PingerEvent>,
) {
    // Departed peers, plus peers whose endpoint triple changed (IP churn):
    // both get their prober torn down; the collector purges the store entry
    // when it sees the final Stopped message.
    let deleted: Vec<String> = pingers
        .iter()
        .filter(|(name, running)| {
            !latest
                .get(*name)
                .is_some_and(|peer| peer.same_endpoint(&running.peer))
        })
        .map(|(name, _)| name.clone())
        .collect();
    for name in &deleted {
        if let Some(running) = pingers.remove(name) {
            info!(peer = %name, "stopping pinger");
            let _ = running.stop.send(true);
        }
    }

    let added: Vec<&Peer> = latest
        .values()
        .filter(|peer| !pingers.contains_key(&peer.name))
        .collect();
    if added.is_empty() {
        return;
    }

    // Staggered start: the k-th newcomer waits k * (interval / |new|) before
    // its first ping, so a fresh selection does not stampede the network.
    let spacing = state.config.refresh_interval / added.len() as u32;
    for (k, peer) in added.into_iter().enumerate() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let pinger = Pinger::new(peer.clone(), state.clone(), tx.clone());
        let handle = tokio::spawn(pinger.run(
            spacing * k as u32,
            state.config.refresh_interval,
            state.config.jitter_factor,
            stop_rx,
        ));
        pingers.insert(
            peer.name.clone(),
            RunningProber {
                peer: peer.clone(),
                stop: stop_tx,
                handle,
            },
        );
    }
}

/// Task B: the single reader of the results channel and the only code that
/// mutates the result store. Keeps the health gauge equal to the store's
/// healthy/unhealthy split after every message.
async fn collect_results(state: AppState, mut rx: mpsc::Receiver<PingerEvent>) {
    while let Some(event) = rx.recv().await {
        let (healthy, unhealthy) = match event {
            PingerEvent::Result { name, result } => {
                if !result.ok {
                    warn!(peer = %name, error = ?result.error, "peer reported unhealthy");
                }
                state.store.apply_update(&name, result)
            }
            PingerEvent::Stopped { name } => state.store.apply_removal(&name),
        };
        state.metrics.set_nodes_health(healthy, unhealthy);
    }
    info!("collector stopped");
}
