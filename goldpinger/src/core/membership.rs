//! Membership: which goldpinger instances exist in the cluster right now.
//!
//! The orchestrator is reached through the `PodLister` trait so tests can
//! inject a fake; `KubeLister` is the production implementation, a thin
//! reqwest client against the cluster API.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, warn};

use crate::core::config::Config;
use crate::core::metrics::Metrics;

/// One goldpinger instance as seen by the membership resolver.
///
/// Identity is `name`; two peers are the same endpoint only when name,
/// podIP and hostIP all match, so IP churn forces prober recreation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub name: String,
    pub pod_ip: String,
    pub host_ip: String,
    pub node_name: String,
}

impl Peer {
    pub fn same_endpoint(&self, other: &Peer) -> bool {
        self.name == other.name && self.pod_ip == other.pod_ip && self.host_ip == other.host_ip
    }

    /// The address peer calls are made to.
    pub fn target_ip<'a>(&'a self, use_host_ip: bool) -> &'a str {
        if use_host_ip {
            &self.host_ip
        } else {
            &self.pod_ip
        }
    }
}

/// Raw pod listing entry, before address-family resolution.
#[derive(Clone, Debug, Default)]
pub struct PodRecord {
    pub name: String,
    pub node_name: String,
    pub pod_ip: String,
    pub pod_ips: Vec<String>,
    pub host_ip: String,
}

#[derive(Clone, Debug)]
pub struct NodeAddress {
    pub kind: String,
    pub address: String,
}

#[async_trait]
pub trait PodLister: Send + Sync {
    /// List running instances matching the selector. `namespace` may be
    /// empty, meaning all namespaces the credentials can see.
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> anyhow::Result<Vec<PodRecord>>;

    /// Addresses of the node hosting a pod, for host-IP family fallback.
    async fn node_addresses(&self, node_name: &str) -> anyhow::Result<Vec<NodeAddress>>;
}

/// Resolves the current peer set, caching node addresses across calls.
pub struct MembershipResolver {
    lister: Box<dyn PodLister>,
    node_ip_cache: Mutex<HashMap<String, String>>,
}

impl MembershipResolver {
    pub fn new(lister: Box<dyn PodLister>) -> Self {
        Self {
            lister,
            node_ip_cache: Mutex::new(HashMap::new()),
        }
    }

    /// The set of peer instances visible right now, keyed by name.
    ///
    /// Any listing failure yields the empty map rather than a partial view
    /// that could mislead the selector.
    pub async fn list_peers(&self, config: &Config, metrics: &Metrics) -> HashMap<String, Peer> {
        let start = Instant::now();
        let records = match self
            .lister
            .list_pods(&config.namespace, &config.label_selector)
            .await
        {
            Ok(records) => {
                metrics.observe_kube_master_call(start.elapsed().as_secs_f64());
                records
            }
            Err(e) => {
                error!(selector = %config.label_selector, "error listing instances: {e:#}");
                metrics.count_error("kubernetes_api");
                return HashMap::new();
            }
        };

        let mut peers = HashMap::new();
        for record in records {
            let pod_ip = self.resolve_pod_ip(&record, config);
            let host_ip = self.resolve_host_ip(&record, config, metrics).await;
            let name = if config.display_node_name {
                record.node_name.clone()
            } else {
                record.name.clone()
            };
            peers.insert(
                name.clone(),
                Peer {
                    name,
                    pod_ip,
                    host_ip,
                    node_name: record.node_name,
                },
            );
        }
        peers
    }

    fn resolve_pod_ip(&self, record: &PodRecord, config: &Config) -> String {
        if config.ip_version.matches(&record.pod_ip) {
            return record.pod_ip.clone();
        }
        record
            .pod_ips
            .iter()
            .find(|ip| config.ip_version.matches(ip))
            .cloned()
            .unwrap_or_default()
    }

    async fn resolve_host_ip(
        &self,
        record: &PodRecord,
        config: &Config,
        metrics: &Metrics,
    ) -> String {
        if config.ip_version.matches(&record.host_ip) {
            return record.host_ip.clone();
        }

        if let Some(cached) = self
            .node_ip_cache
            .lock()
            .unwrap()
            .get(&record.node_name)
            .cloned()
        {
            return cached;
        }

        let start = Instant::now();
        let addresses = match self.lister.node_addresses(&record.node_name).await {
            Ok(addresses) => {
                metrics.observe_kube_master_call(start.elapsed().as_secs_f64());
                addresses
            }
            Err(e) => {
                error!(node = %record.node_name, "error getting node: {e:#}");
                metrics.count_error("kubernetes_api");
                return record.host_ip.clone();
            }
        };

        let resolved = addresses
            .iter()
            .filter(|a| a.kind == "InternalIP" || a.kind == "ExternalIP")
            .map(|a| a.address.clone())
            .find(|addr| config.ip_version.matches(addr))
            .unwrap_or_else(|| record.host_ip.clone());

        self.node_ip_cache
            .lock()
            .unwrap()
            .insert(record.node_name.clone(), resolved.clone());
        resolved
    }
}

/// Production lister: the cluster API over plain REST.
pub struct KubeLister {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

const TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

impl KubeLister {
    pub fn new(api_url: String) -> anyhow::Result<Self> {
        let token = match std::fs::read_to_string(TOKEN_FILE) {
            Ok(t) => Some(t.trim().to_string()),
            Err(e) => {
                warn!("no service-account token available: {}", e);
                None
            }
        };

        // The in-cluster CA is not loaded; the API server is reached over
        // the cluster-internal service address.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let req = self.http.get(url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodItem>,
}

#[derive(Deserialize)]
struct PodItem {
    metadata: PodMetadata,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize)]
struct PodMetadata {
    name: String,
}

#[derive(Deserialize, Default)]
struct PodSpec {
    #[serde(rename = "nodeName", default)]
    node_name: String,
}

#[derive(Deserialize, Default)]
struct PodStatus {
    #[serde(rename = "podIP", default)]
    pod_ip: String,
    #[serde(rename = "podIPs", default)]
    pod_ips: Vec<PodIp>,
    #[serde(rename = "hostIP", default)]
    host_ip: String,
}

#[derive(Deserialize)]
struct PodIp {
    ip: String,
}

#[derive(Deserialize)]
struct Node {
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Deserialize, Default)]
struct NodeStatus {
    #[serde(default)]
    addresses: Vec<NodeStatusAddress>,
}

#[derive(Deserialize)]
struct NodeStatusAddress {
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

#[async_trait]
impl PodLister for KubeLister {
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> anyhow::Result<Vec<PodRecord>> {
        let url = if namespace.is_empty() {
            format!("{}/api/v1/pods", self.api_url)
        } else {
            format!("{}/api/v1/namespaces/{}/pods", self.api_url, namespace)
        };

        let resp = self
            .get(url)
            .query(&[
                ("labelSelector", label_selector),
                ("fieldSelector", "status.phase=Running"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("pod list returned {}", resp.status());
        }

        let list: PodList = resp.json().await?;
        Ok(list
            .items
            .into_iter()
            .map(|item| PodRecord {
                name: item.metadata.name,
                node_name: item.spec.node_name,
                pod_ip: item.status.pod_ip,
                pod_ips: item.status.pod_ips.into_iter().map(|p| p.ip).collect(),
                host_ip: item.status.host_ip,
            })
            .collect())
    }

    async fn node_addresses(&self, node_name: &str) -> anyhow::Result<Vec<NodeAddress>> {
        let url = format!("{}/api/v1/nodes/{}", self.api_url, node_name);
        let resp = self.get(url).send().await?;

        if !resp.status().is_success() {
            anyhow::bail!("node get returned {}", resp.status());
        }

        let node: Node = resp.json().await?;
        Ok(node
            .status
            .addresses
            .into_iter()
            .map(|a| NodeAddress {
                kind: a.kind,
                address: a.address,
            })
            .collect())
    }
}
