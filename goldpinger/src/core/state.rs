use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;

use common::schemas::PingResults;
use common::time_utils::utc_now;

use crate::core::config::Config;
use crate::core::membership::{MembershipResolver, Peer, PodLister};
use crate::core::metrics::Metrics;
use crate::core::select::select_peers;
use crate::core::store::ResultStore;

/// Everything the handlers and background tasks share, constructed once at
/// start-up. Tests build one with a fake `PodLister` injected.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http_client: reqwest::Client,
    pub metrics: Arc<Metrics>,
    pub store: Arc<ResultStore>,
    pub membership: Arc<MembershipResolver>,
    pub boot_time: OffsetDateTime,
}

impl AppState {
    pub fn new(config: Config, lister: Box<dyn PodLister>) -> Self {
        let metrics = Arc::new(Metrics::new(config.hostname.clone()));
        Self {
            config: Arc::new(config),
            http_client: reqwest::Client::new(),
            metrics,
            store: Arc::new(ResultStore::new()),
            membership: Arc::new(MembershipResolver::new(lister)),
            boot_time: utc_now(),
        }
    }

    /// The full membership visible right now.
    pub async fn all_peers(&self) -> HashMap<String, Peer> {
        self.membership.list_peers(&self.config, &self.metrics).await
    }

    /// Membership narrowed to this instance's rendezvous selection.
    pub async fn selected_peers(&self) -> HashMap<String, Peer> {
        select_peers(
            &self.config.pod_name,
            self.config.ping_number,
            self.all_peers().await,
        )
    }

    pub fn ping_payload(&self) -> PingResults {
        PingResults {
            boot_time: self.boot_time,
        }
    }
}
