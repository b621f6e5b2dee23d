use std::time::Duration;

use reqwest::Client;

mod common;
use self::common::*;
use ::common::schemas::{HealthCheckResults, PingResults};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ping_healthz_and_metrics() -> anyhow::Result<()> {
    let cluster = TestCluster::start(1, Duration::from_millis(150)).await?;
    let client = Client::new();
    let url = &cluster.instances[0].url;

    // /ping carries the boot time.
    let resp = client.get(format!("{}/ping", url)).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let ping: PingResults = resp.json().await?;
    assert_eq!(ping.boot_time, cluster.instances[0].state.boot_time);

    // /healthz reports ok.
    let resp = client.get(format!("{}/healthz", url)).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let health: HealthCheckResults = resp.json().await?;
    assert!(health.ok);

    // The received-call counters show up in the exposition.
    let metrics = get_metrics(&client, url).await?;
    assert!(metrics.contains(
        "goldpinger_stats_total{goldpinger_instance=\"goldpinger-1\",group=\"received\",action=\"ping\"}"
    ));
    assert!(metrics.contains("goldpinger_nodes_health_total"));

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_instance_pings_itself() -> anyhow::Result<()> {
    let cluster = TestCluster::start(1, Duration::from_millis(150)).await?;
    let client = Client::new();
    let url = cluster.instances[0].url.clone();

    wait_until(5000, || async {
        let (total, ok) = snapshot_counts(&client, &url).await?;
        Ok(total == 1 && ok == 1)
    })
    .await?;

    let results = get_check(&client, &url).await?;
    let own = &results.pod_results["goldpinger-1"];
    assert_eq!(own.status_code, 200);
    assert_eq!(own.pod_ip, "127.0.0.1");
    assert!(own.response.is_some());
    // No external targets configured, so no probe results at all.
    assert!(results.probe_results.is_empty());

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zero_refresh_interval_starts_no_probers() -> anyhow::Result<()> {
    let cluster = TestCluster::start(1, Duration::ZERO).await?;
    let client = Client::new();
    let url = &cluster.instances[0].url;

    // Give a would-be updater ample time to have produced something.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let results = get_check(&client, url).await?;
    assert!(results.pod_results.is_empty());
    assert!(cluster.instances[0].state.store.is_empty());

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_heatmap_renders_a_png() -> anyhow::Result<()> {
    let cluster = TestCluster::start(2, Duration::from_millis(150)).await?;
    let client = Client::new();
    let url = cluster.instances[0].url.clone();

    wait_until(5000, || async {
        let (total, ok) = snapshot_counts(&client, &url).await?;
        Ok(total == 2 && ok == 2)
    })
    .await?;

    let resp = client
        .get(format!("{}/heatmap.png?t0=1&t1=2&t2=3", url))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/png");
    let body = resp.bytes().await?;
    assert!(!body.is_empty());
    assert_eq!(&body[..8], b"\x89PNG\r\n\x1a\n");

    cluster.shutdown().await?;
    Ok(())
}
