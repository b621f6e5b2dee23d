//! Stable peer selection under partial fan-out.
//!
//! Rendezvous (highest-random-weight) hashing: each peer is weighted by
//! `xxhash64(selfKey || peerKey)` and the top `count` survive. Adding or
//! removing one peer reshuffles only O(1/n) of the selection, which keeps
//! prober churn low across membership changes.

use std::collections::HashMap;

use twox_hash::XxHash64;

use crate::core::membership::Peer;

fn weight(self_key: &str, peer_key: &str) -> u64 {
    let mut key = Vec::with_capacity(self_key.len() + peer_key.len());
    key.extend_from_slice(self_key.as_bytes());
    key.extend_from_slice(peer_key.as_bytes());
    XxHash64::oneshot(0, &key)
}

/// Narrow `peers` down to at most `count` entries, deterministically.
///
/// A `count` of 0, a `count` covering the whole set, or an empty `self_key`
/// (no rendezvous identity to hash with) all select every peer. Ties on
/// weight break on the peer name so the output is a pure function of the
/// input.
pub fn select_peers(
    self_key: &str,
    count: usize,
    peers: HashMap<String, Peer>,
) -> HashMap<String, Peer> {
    if self_key.is_empty() || count == 0 || count >= peers.len() {
        return peers;
    }

    let mut scored: Vec<(u64, String)> = peers
        .keys()
        .map(|name| (weight(self_key, name), name.clone()))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let mut selected = HashMap::with_capacity(count);
    for (_, name) in scored.into_iter().take(count) {
        if let Some(peer) = peers.get(&name) {
            selected.insert(name, peer.clone());
        }
    }
    selected
}
