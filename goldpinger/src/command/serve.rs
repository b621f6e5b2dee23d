use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::{routing::get, Router};
use axum_server::Server;
use clap::Parser;
use tokio::sync::watch;
use tower_http::services::ServeDir;
use tracing::info;

use crate::core::config::{detect_namespace, Config, IpVersion};
use crate::core::membership::KubeLister;
use crate::core::routes;
use crate::core::state::AppState;
use crate::core::updater;

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Period between membership refreshes and individual pings; 0s disables probing
    #[arg(long, env = "REFRESH_INTERVAL", default_value = "30s", value_parser = humantime::parse_duration)]
    pub refresh_interval: Duration,

    /// Fractional jitter added to each prober's period (0 to 1)
    #[arg(long, env = "JITTER_FACTOR", default_value_t = 0.05)]
    pub jitter_factor: f64,

    /// Deadline for a single peer ping
    #[arg(long, env = "PING_TIMEOUT", default_value = "1s", value_parser = humantime::parse_duration)]
    pub ping_timeout: Duration,

    /// Deadline for a single peer check call
    #[arg(long, env = "CHECK_TIMEOUT", default_value = "1s", value_parser = humantime::parse_duration)]
    pub check_timeout: Duration,

    /// Deadline for the whole check_all fan-out
    #[arg(long, env = "CHECK_ALL_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub check_all_timeout: Duration,

    /// Deadline per DNS probe
    #[arg(long, env = "DNS_CHECK_TIMEOUT", default_value = "1s", value_parser = humantime::parse_duration)]
    pub dns_check_timeout: Duration,

    /// Deadline per TCP probe
    #[arg(long, env = "TCP_CHECK_TIMEOUT", default_value = "1s", value_parser = humantime::parse_duration)]
    pub tcp_check_timeout: Duration,

    /// Deadline per HTTP probe
    #[arg(long, env = "HTTP_CHECK_TIMEOUT", default_value = "1s", value_parser = humantime::parse_duration)]
    pub http_check_timeout: Duration,

    /// Number of peers to ping; 0 pings all peers
    #[arg(long, env = "PING_NUMBER", default_value_t = 0)]
    pub ping_number: usize,

    /// This instance's name, used as the rendezvous key
    #[arg(long, env = "POD_NAME", default_value = "")]
    pub pod_name: String,

    /// This instance's pod IP
    #[arg(long, env = "POD_IP", default_value = "")]
    pub pod_ip: String,

    /// This instance's host IP
    #[arg(long, env = "HOST_IP", default_value = "")]
    pub host_ip: String,

    /// When making peer calls, target host IPs instead of pod IPs
    #[arg(long, env = "USE_HOST_IP")]
    pub use_host_ip: bool,

    /// Label selector used to discover goldpinger instances
    #[arg(long, env = "LABEL_SELECTOR", default_value = "app=goldpinger")]
    pub label_selector: String,

    /// Namespace to list instances in; auto-detected from the
    /// service-account mount when unset
    #[arg(long, env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// IP family to extract from the listing: 4 or 6
    #[arg(long, env = "IP_VERSION", default_value = "4")]
    pub ip_version: String,

    /// External DNS hosts to probe on every check
    #[arg(long, env = "DNS_HOSTS", value_delimiter = ',')]
    pub dns_hosts: Vec<String>,

    /// External host:port targets to dial on every check
    #[arg(long, env = "TCP_TARGETS", value_delimiter = ',')]
    pub tcp_targets: Vec<String>,

    /// External URLs to GET on every check
    #[arg(long, env = "HTTP_TARGETS", value_delimiter = ',')]
    pub http_targets: Vec<String>,

    /// Report peers by node name instead of pod name
    #[arg(long, env = "DISPLAY_NODE_NAME")]
    pub display_node_name: bool,

    /// Use this port when calling other instances; 0 means the listen port
    #[arg(long, env = "CLIENT_PORT_OVERRIDE", default_value_t = 0)]
    pub client_port_override: u16,

    /// Instance label attached to every metric
    #[arg(long, env = "HOSTNAME")]
    pub hostname: Option<String>,

    /// Folder for serving static UI files
    #[arg(long, env = "STATIC_FILE_PATH")]
    pub static_file_path: Option<PathBuf>,

    /// Cluster API endpoint used to list peer instances
    #[arg(long, env = "KUBE_API_URL", default_value = "https://kubernetes.default.svc")]
    pub kube_api_url: String,
}

impl ServeArgs {
    /// Freeze the parsed flags into the runtime configuration. Invalid
    /// values abort here, before any task spawns.
    pub fn into_config(self, listen_port: u16) -> anyhow::Result<Config> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            anyhow::bail!(
                "jitter factor must be between 0 and 1, got {}",
                self.jitter_factor
            );
        }
        let ip_version = IpVersion::parse(&self.ip_version)?;

        let client_port = if self.client_port_override == 0 {
            listen_port
        } else {
            self.client_port_override
        };

        let hostname = self.hostname.unwrap_or_else(|| {
            gethostname::gethostname().to_string_lossy().into_owned()
        });

        let namespace = match self.namespace {
            Some(ns) => ns,
            None => detect_namespace(),
        };

        Ok(Config {
            refresh_interval: self.refresh_interval,
            jitter_factor: self.jitter_factor,
            ping_timeout: self.ping_timeout,
            check_timeout: self.check_timeout,
            check_all_timeout: self.check_all_timeout,
            dns_check_timeout: self.dns_check_timeout,
            tcp_check_timeout: self.tcp_check_timeout,
            http_check_timeout: self.http_check_timeout,
            ping_number: self.ping_number,
            pod_name: self.pod_name,
            pod_ip: self.pod_ip,
            host_ip: self.host_ip,
            use_host_ip: self.use_host_ip,
            label_selector: self.label_selector,
            namespace,
            ip_version,
            dns_hosts: self.dns_hosts,
            tcp_targets: self.tcp_targets,
            http_targets: self.http_targets,
            display_node_name: self.display_node_name,
            client_port,
            hostname,
            static_file_path: self.static_file_path,
        })
    }
}

/// The full peer-facing HTTP surface over the given state.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/ping", get(routes::ping))
        .route("/check", get(routes::check))
        .route("/check_all", get(routes::check_all))
        .route("/cluster_health", get(routes::cluster_health))
        .route("/healthz", get(routes::healthz))
        .route("/metrics", get(routes::metrics))
        .route("/heatmap.png", get(routes::heatmap));

    if let Some(dir) = &state.config.static_file_path {
        router = router
            .nest_service("/static", ServeDir::new(dir))
            .fallback_service(ServeDir::new(dir));
    }

    router.with_state(state)
}

pub async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let socket_addr: SocketAddr = args.listen.parse()?;
    let config = args.clone().into_config(socket_addr.port())?;

    if config.pod_name.is_empty() {
        info!("pod name not set: pinging all peers");
    }
    if config.ping_number == 0 {
        info!("ping number is 0: pinging all peers");
    }

    let lister = KubeLister::new(args.kube_api_url)?;
    let state = AppState::new(config, Box::new(lister));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let updater_handle = tokio::spawn(updater::run(state.clone(), shutdown_rx));

    let app = build_router(state);
    let server = Server::bind(socket_addr).serve(app.into_make_service());

    info!("listening on {}", args.listen);

    // Graceful shutdown: ctrl+c
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    let _ = shutdown_tx.send(true);
    let _ = updater_handle.await;

    Ok(())
}
