use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::net::TcpListener;

mod common;
use self::common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_check_all_collects_every_peer() -> anyhow::Result<()> {
    let cluster = TestCluster::start(3, Duration::from_millis(150)).await?;
    let client = Client::new();
    let url = cluster.instances[0].url.clone();

    wait_until(8000, || async {
        let (total, ok) = snapshot_counts(&client, &url).await?;
        Ok(total == 3 && ok == 3)
    })
    .await?;

    let results = get_check_all(&client, &url).await?;
    assert_eq!(results.responses.len(), 3);
    assert_eq!(results.hosts.len(), 3);

    let mut host_names: Vec<&String> = results.hosts.iter().map(|h| &h.name).collect();
    host_names.sort();
    assert_eq!(host_names, ["goldpinger-1", "goldpinger-2", "goldpinger-3"]);

    for (name, response) in &results.responses {
        assert!(response.ok, "{name} should be reachable");
        let payload = response.response.as_ref().expect("payload present");
        assert_eq!(payload.pod_results.len(), 3);
    }

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_failure_never_discards_other_responses() -> anyhow::Result<()> {
    let cluster = TestCluster::start(3, Duration::from_millis(150)).await?;
    let client = Client::new();
    let url = cluster.instances[0].url.clone();

    wait_until(8000, || async {
        let (total, ok) = snapshot_counts(&client, &url).await?;
        Ok(total == 3 && ok == 3)
    })
    .await?;

    cluster.instances[2].kill_server();

    wait_until(8000, || async {
        let results = get_check_all(&client, &url).await?;
        Ok(results
            .responses
            .get("goldpinger-3")
            .is_some_and(|r| !r.ok))
    })
    .await?;

    let results = get_check_all(&client, &url).await?;
    assert_eq!(results.responses.len(), 3);

    let dead = &results.responses["goldpinger-3"];
    assert!(!dead.ok);
    assert!(dead.response.is_none());
    assert!(dead.error.as_deref().is_some_and(|e| !e.is_empty()));

    for name in ["goldpinger-1", "goldpinger-2"] {
        let alive = &results.responses[name];
        assert!(alive.ok, "{name} response should survive the failure");
        assert!(alive.response.is_some());
    }

    cluster.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fan_out_deadline_bounds_a_hung_peer() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    // A peer that accepts connections and never answers, so only the
    // fan-out deadline can end the call.
    let silent = TcpListener::bind(format!("127.0.0.2:{}", port)).await?;
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((socket, _)) = silent.accept().await else {
                return;
            };
            held.push(socket);
        }
    });

    let mut config = test_config(0, port, Duration::from_millis(150));
    config.check_timeout = Duration::from_secs(10);
    config.check_all_timeout = Duration::from_millis(300);

    let lister = SharedLister::new(vec![pod_record(0), pod_record(1)]);
    let instance = TestInstance::start(config, lister, listener).await?;
    let client = Client::new();

    let start = Instant::now();
    let results = get_check_all(&client, &instance.url).await?;
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "fan-out must not wait out the per-call timeout"
    );

    let hung = &results.responses["goldpinger-2"];
    assert!(!hung.ok);
    assert!(hung.response.is_none());
    assert!(hung
        .error
        .as_deref()
        .is_some_and(|e| e.contains("deadline")));

    // The reachable peer's slot is untouched by the expiry.
    let own = &results.responses["goldpinger-1"];
    assert!(own.ok);
    assert!(own.response.is_some());

    instance.shutdown().await?;
    Ok(())
}
