#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use axum_server::Server;
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use goldpinger::command::serve::build_router;
use goldpinger::core::config::{Config, IpVersion};
use goldpinger::core::membership::{NodeAddress, PodLister, PodRecord};
use goldpinger::core::state::AppState;
use goldpinger::core::updater;

use ::common::schemas::{CheckAllResults, CheckResults, ClusterHealthResults, PodResult};

/// Membership fake shared by every instance of a test cluster; tests mutate
/// the pod list to simulate churn.
#[derive(Clone)]
pub struct SharedLister {
    pub pods: Arc<RwLock<Vec<PodRecord>>>,
}

impl SharedLister {
    pub fn new(pods: Vec<PodRecord>) -> Self {
        Self {
            pods: Arc::new(RwLock::new(pods)),
        }
    }

    pub fn set_pods(&self, pods: Vec<PodRecord>) {
        *self.pods.write().unwrap() = pods;
    }
}

#[async_trait]
impl PodLister for SharedLister {
    async fn list_pods(&self, _: &str, _: &str) -> Result<Vec<PodRecord>> {
        Ok(self.pods.read().unwrap().clone())
    }

    async fn node_addresses(&self, _: &str) -> Result<Vec<NodeAddress>> {
        Ok(vec![])
    }
}

pub fn test_config(index: usize, client_port: u16, refresh: Duration) -> Config {
    Config {
        refresh_interval: refresh,
        jitter_factor: 0.0,
        ping_timeout: Duration::from_secs(2),
        check_timeout: Duration::from_secs(2),
        check_all_timeout: Duration::from_secs(5),
        dns_check_timeout: Duration::from_secs(1),
        tcp_check_timeout: Duration::from_secs(1),
        http_check_timeout: Duration::from_secs(1),
        ping_number: 0,
        pod_name: instance_name(index),
        pod_ip: pod_ip(index),
        host_ip: host_ip(index),
        use_host_ip: false,
        label_selector: "app=goldpinger".to_string(),
        namespace: "default".to_string(),
        ip_version: IpVersion::V4,
        dns_hosts: vec![],
        tcp_targets: vec![],
        http_targets: vec![],
        display_node_name: false,
        client_port,
        hostname: instance_name(index),
        static_file_path: None,
    }
}

pub fn instance_name(index: usize) -> String {
    format!("goldpinger-{}", index + 1)
}

/// Pod IPs are distinct loopback addresses so every instance can be dialed
/// on the same client port.
pub fn pod_ip(index: usize) -> String {
    format!("127.0.0.{}", index + 1)
}

/// Host IPs are never dialed in tests, only reported and compared.
pub fn host_ip(index: usize) -> String {
    format!("10.0.0.{}", index + 1)
}

pub fn pod_record(index: usize) -> PodRecord {
    PodRecord {
        name: instance_name(index),
        node_name: format!("node-{}", index + 1),
        pod_ip: pod_ip(index),
        pod_ips: vec![],
        host_ip: host_ip(index),
    }
}

pub struct TestInstance {
    pub state: AppState,
    pub url: String,
    pub addr: SocketAddr,
    server_handle: JoinHandle<Result<()>>,
    updater_handle: JoinHandle<Result<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl TestInstance {
    pub async fn start(config: Config, lister: SharedLister, listener: TcpListener) -> Result<Self> {
        let addr = listener.local_addr()?;
        let url = format!("http://{}", addr);

        let state = AppState::new(config, Box::new(lister));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let updater_handle = tokio::spawn(updater::run(state.clone(), shutdown_rx));

        let app = build_router(state.clone());
        let server_handle = tokio::spawn(async move {
            Server::from_tcp(listener.into_std()?)
                .serve(app.into_make_service())
                .await
                .map_err(anyhow::Error::from)
        });

        Ok(Self {
            state,
            url,
            addr,
            server_handle,
            updater_handle,
            shutdown_tx,
        })
    }

    /// Kill the HTTP server without stopping the probers, making this
    /// instance unreachable for its peers.
    pub fn kill_server(&self) {
        self.server_handle.abort();
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        let _ = self.updater_handle.await;
        self.server_handle.abort();
        let _ = self.server_handle.await;
        Ok(())
    }
}

pub struct TestCluster {
    pub instances: Vec<TestInstance>,
    pub lister: SharedLister,
    pub client_port: u16,
}

impl TestCluster {
    /// Start `n` full instances on 127.0.0.1..127.0.0.n, all listening on
    /// the same port, with a shared fake membership listing all of them.
    pub async fn start(n: usize, refresh: Duration) -> Result<Self> {
        let first = TcpListener::bind("127.0.0.1:0").await?;
        let client_port = first.local_addr()?.port();

        let mut listeners = vec![first];
        for index in 1..n {
            let addr = format!("{}:{}", pod_ip(index), client_port);
            listeners.push(TcpListener::bind(&addr).await?);
        }

        let lister = SharedLister::new((0..n).map(pod_record).collect());

        let mut instances = Vec::with_capacity(n);
        for (index, listener) in listeners.into_iter().enumerate() {
            let config = test_config(index, client_port, refresh);
            instances.push(TestInstance::start(config, lister.clone(), listener).await?);
        }

        Ok(Self {
            instances,
            lister,
            client_port,
        })
    }

    pub async fn shutdown(self) -> Result<()> {
        for instance in self.instances {
            instance.shutdown().await?;
        }
        Ok(())
    }
}

// HTTP client helpers

pub async fn get_check(client: &Client, url: &str) -> Result<CheckResults> {
    let resp = client.get(format!("{}/check", url)).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("check failed: {}", resp.status());
    }
    Ok(resp.json().await?)
}

pub async fn get_check_all(client: &Client, url: &str) -> Result<CheckAllResults> {
    let resp = client.get(format!("{}/check_all", url)).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("check_all failed: {}", resp.status());
    }
    Ok(resp.json().await?)
}

pub async fn get_cluster_health(
    client: &Client,
    url: &str,
) -> Result<(reqwest::StatusCode, ClusterHealthResults)> {
    let resp = client.get(format!("{}/cluster_health", url)).send().await?;
    let status = resp.status();
    Ok((status, resp.json().await?))
}

pub async fn get_metrics(client: &Client, url: &str) -> Result<String> {
    Ok(client
        .get(format!("{}/metrics", url))
        .send()
        .await?
        .text()
        .await?)
}

/// How many peers `url`'s snapshot currently reports, and how many are ok.
pub async fn snapshot_counts(client: &Client, url: &str) -> Result<(usize, usize)> {
    let results = get_check(client, url).await?;
    let ok = results.pod_results.values().filter(|r| r.ok).count();
    Ok((results.pod_results.len(), ok))
}

pub fn names_of(results: &HashMap<String, PodResult>) -> Vec<String> {
    let mut names: Vec<String> = results.keys().cloned().collect();
    names.sort();
    names
}

pub async fn wait_until<F, Fut>(timeout_ms: u64, mut check_fn: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let timeout_duration = Duration::from_millis(timeout_ms);

    loop {
        if check_fn().await? {
            return Ok(());
        }

        if start.elapsed() > timeout_duration {
            anyhow::bail!("wait_until timed out after {}ms", timeout_ms);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
