//! The shared result store: latest PodResult per peer.
//!
//! All mutations happen on the collector loop, the store's sole logical
//! writer. Readers take the lock only long enough to copy the map, so
//! snapshots can be served without holding anything.

use std::collections::HashMap;
use std::sync::Mutex;

use common::schemas::PodResult;

#[derive(Default)]
struct StoreInner {
    pod_results: HashMap<String, PodResult>,
    healthy: u64,
}

#[derive(Default)]
pub struct ResultStore {
    inner: Mutex<StoreInner>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `name`, keeping the healthy counter in step.
    /// Returns the (healthy, unhealthy) pair after the update.
    pub fn apply_update(&self, name: &str, result: PodResult) -> (u64, u64) {
        let mut inner = self.inner.lock().unwrap();
        let was_ok = inner.pod_results.get(name).map(|r| r.ok);
        match (was_ok, result.ok) {
            (Some(false) | None, true) => inner.healthy += 1,
            (Some(true), false) => inner.healthy -= 1,
            _ => {}
        }
        inner.pod_results.insert(name.to_string(), result);
        counts(&inner)
    }

    /// Drop the entry for a departed peer, if present.
    pub fn apply_removal(&self, name: &str) -> (u64, u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(removed) = inner.pod_results.remove(name) {
            if removed.ok {
                inner.healthy -= 1;
            }
        }
        counts(&inner)
    }

    /// Value-copy of the current results, safe to serve with no lock held.
    pub fn snapshot(&self) -> HashMap<String, PodResult> {
        self.inner.lock().unwrap().pod_results.clone()
    }

    pub fn healthy_count(&self) -> u64 {
        self.inner.lock().unwrap().healthy
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().pod_results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn counts(inner: &StoreInner) -> (u64, u64) {
    let total = inner.pod_results.len() as u64;
    (inner.healthy, total - inner.healthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::time_utils::utc_now;

    fn result(ok: bool) -> PodResult {
        PodResult {
            ok,
            status_code: if ok { 200 } else { 504 },
            response_time_ms: 1,
            error: if ok { None } else { Some("timeout".to_string()) },
            ping_time: utc_now(),
            pod_ip: "10.0.0.5".to_string(),
            host_ip: "192.168.1.5".to_string(),
            response: None,
        }
    }

    fn healthy_entries(store: &ResultStore) -> u64 {
        store.snapshot().values().filter(|r| r.ok).count() as u64
    }

    #[test]
    fn healthy_counter_tracks_transitions() {
        let store = ResultStore::new();

        assert_eq!(store.apply_update("a", result(true)), (1, 0));
        assert_eq!(store.apply_update("b", result(false)), (1, 1));
        // a flips unhealthy, b flips healthy.
        assert_eq!(store.apply_update("a", result(false)), (0, 2));
        assert_eq!(store.apply_update("b", result(true)), (1, 1));
        // Re-observing the same state is a no-op for the counter.
        assert_eq!(store.apply_update("b", result(true)), (1, 1));

        assert_eq!(store.healthy_count(), healthy_entries(&store));
    }

    #[test]
    fn removal_decrements_only_for_healthy_entries() {
        let store = ResultStore::new();
        store.apply_update("a", result(true));
        store.apply_update("b", result(false));

        assert_eq!(store.apply_removal("b"), (1, 0));
        assert_eq!(store.apply_removal("a"), (0, 0));
        // Removing an unknown name is harmless.
        assert_eq!(store.apply_removal("ghost"), (0, 0));
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let store = ResultStore::new();
        store.apply_update("a", result(true));

        let snapshot = store.snapshot();
        store.apply_update("a", result(false));

        assert!(snapshot["a"].ok);
        assert!(!store.snapshot()["a"].ok);
    }
}
