//! Instance metrics and Prometheus text exposition.
//!
//! Counters and histograms are kept in-process behind a single mutex and
//! rendered on demand for the `/metrics` endpoint. Every series carries a
//! `goldpinger_instance` label with this instance's hostname.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Latency bucket ladder, in seconds, shared by both histograms.
pub const BUCKETS: [f64; 12] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

#[derive(Clone, Debug, Default)]
struct Histogram {
    bucket_counts: [u64; 12],
    sum: f64,
    count: u64,
}

impl Histogram {
    fn observe(&mut self, seconds: f64) {
        for (i, bound) in BUCKETS.iter().enumerate() {
            if seconds <= *bound {
                self.bucket_counts[i] += 1;
            }
        }
        self.sum += seconds;
        self.count += 1;
    }
}

#[derive(Default)]
struct Inner {
    /// (group, action) -> calls made/received.
    stats: BTreeMap<(String, String), u64>,
    /// error type -> count.
    errors: BTreeMap<String, u64>,
    /// dns host -> failed lookups.
    dns_errors: BTreeMap<String, u64>,
    /// (call_type, host_ip, pod_ip) -> peer-call latency.
    peers: BTreeMap<(String, String, String), Histogram>,
    /// Membership-listing latency.
    kube_master: Histogram,
}

pub struct Metrics {
    instance: String,
    inner: Mutex<Inner>,
    nodes_healthy: AtomicU64,
    nodes_unhealthy: AtomicU64,
}

impl Metrics {
    pub fn new(instance: String) -> Self {
        Self {
            instance,
            inner: Mutex::new(Inner::default()),
            nodes_healthy: AtomicU64::new(0),
            nodes_unhealthy: AtomicU64::new(0),
        }
    }

    /// Counts calls made and received, by group and action.
    pub fn count_call(&self, group: &str, action: &str) {
        let mut inner = self.inner.lock().unwrap();
        *inner
            .stats
            .entry((group.to_string(), action.to_string()))
            .or_insert(0) += 1;
    }

    pub fn count_error(&self, error_type: &str) {
        let mut inner = self.inner.lock().unwrap();
        *inner.errors.entry(error_type.to_string()).or_insert(0) += 1;
    }

    pub fn count_dns_error(&self, host: &str) {
        let mut inner = self.inner.lock().unwrap();
        *inner.dns_errors.entry(host.to_string()).or_insert(0) += 1;
    }

    /// Current healthy/unhealthy node counts as seen from this instance.
    pub fn set_nodes_health(&self, healthy: u64, unhealthy: u64) {
        self.nodes_healthy.store(healthy, Ordering::Relaxed);
        self.nodes_unhealthy.store(unhealthy, Ordering::Relaxed);
    }

    pub fn nodes_health(&self) -> (u64, u64) {
        (
            self.nodes_healthy.load(Ordering::Relaxed),
            self.nodes_unhealthy.load(Ordering::Relaxed),
        )
    }

    pub fn observe_peer_call(&self, call_type: &str, host_ip: &str, pod_ip: &str, seconds: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .peers
            .entry((
                call_type.to_string(),
                host_ip.to_string(),
                pod_ip.to_string(),
            ))
            .or_default()
            .observe(seconds);
    }

    pub fn observe_kube_master_call(&self, seconds: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.kube_master.observe(seconds);
    }

    /// Render every series in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let mut out = String::new();

        out.push_str("# HELP goldpinger_stats_total Statistics of calls made in goldpinger instances.\n");
        out.push_str("# TYPE goldpinger_stats_total counter\n");
        for ((group, action), count) in &inner.stats {
            let _ = writeln!(
                out,
                "goldpinger_stats_total{{goldpinger_instance=\"{}\",group=\"{}\",action=\"{}\"}} {}",
                self.instance, group, action, count
            );
        }

        out.push_str("# HELP goldpinger_nodes_health_total Number of nodes seen as healthy/unhealthy from this instance's POV.\n");
        out.push_str("# TYPE goldpinger_nodes_health_total gauge\n");
        let (healthy, unhealthy) = self.nodes_health();
        let _ = writeln!(
            out,
            "goldpinger_nodes_health_total{{goldpinger_instance=\"{}\",status=\"healthy\"}} {}",
            self.instance, healthy
        );
        let _ = writeln!(
            out,
            "goldpinger_nodes_health_total{{goldpinger_instance=\"{}\",status=\"unhealthy\"}} {}",
            self.instance, unhealthy
        );

        out.push_str("# HELP goldpinger_peers_response_time_s Histogram of response times from other hosts, when making peer calls.\n");
        out.push_str("# TYPE goldpinger_peers_response_time_s histogram\n");
        for ((call_type, host_ip, pod_ip), hist) in &inner.peers {
            let labels = format!(
                "goldpinger_instance=\"{}\",call_type=\"{}\",host_ip=\"{}\",pod_ip=\"{}\"",
                self.instance, call_type, host_ip, pod_ip
            );
            render_histogram(&mut out, "goldpinger_peers_response_time_s", &labels, hist);
        }

        out.push_str("# HELP goldpinger_kube_master_response_time_s Histogram of response times from the cluster API, when listing other instances.\n");
        out.push_str("# TYPE goldpinger_kube_master_response_time_s histogram\n");
        if inner.kube_master.count > 0 {
            let labels = format!("goldpinger_instance=\"{}\"", self.instance);
            render_histogram(
                &mut out,
                "goldpinger_kube_master_response_time_s",
                &labels,
                &inner.kube_master,
            );
        }

        out.push_str("# HELP goldpinger_errors_total Statistics of errors per instance.\n");
        out.push_str("# TYPE goldpinger_errors_total counter\n");
        for (error_type, count) in &inner.errors {
            let _ = writeln!(
                out,
                "goldpinger_errors_total{{goldpinger_instance=\"{}\",type=\"{}\"}} {}",
                self.instance, error_type, count
            );
        }

        out.push_str("# HELP goldpinger_dns_errors_total Statistics of DNS errors per instance.\n");
        out.push_str("# TYPE goldpinger_dns_errors_total counter\n");
        for (host, count) in &inner.dns_errors {
            let _ = writeln!(
                out,
                "goldpinger_dns_errors_total{{goldpinger_instance=\"{}\",host=\"{}\"}} {}",
                self.instance, host, count
            );
        }

        out
    }
}

fn render_histogram(out: &mut String, name: &str, labels: &str, hist: &Histogram) {
    for (i, bound) in BUCKETS.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}_bucket{{{},le=\"{}\"}} {}",
            name, labels, bound, hist.bucket_counts[i]
        );
    }
    let _ = writeln!(out, "{}_bucket{{{},le=\"+Inf\"}} {}", name, labels, hist.count);
    let _ = writeln!(out, "{}_sum{{{}}} {}", name, labels, hist.sum);
    let _ = writeln!(out, "{}_count{{{}}} {}", name, labels, hist.count);
}
