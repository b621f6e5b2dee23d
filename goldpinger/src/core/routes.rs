use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use common::error::ApiError;
use common::schemas::{CheckAllResults, CheckResults, ClusterHealthResults, PingResults};

use crate::core::check::{check_all_pods, check_cluster, check_neighbours, health_check};
use crate::core::heatmap::{override_thresholds, render_heatmap, DEFAULT_THRESHOLDS};
use crate::core::state::AppState;

// GET /ping
/// Liveness marker exchanged between peers; the boot time lets a caller
/// notice restarts.
#[tracing::instrument(name = "goldpinger.ping", skip(ctx))]
pub async fn ping(State(ctx): State<AppState>) -> Json<PingResults> {
    ctx.metrics.count_call("received", "ping");
    Json(ctx.ping_payload())
}

// GET /check
/// Snapshot of this instance's collected peer results plus a fresh
/// external-probe batch.
#[tracing::instrument(name = "goldpinger.check", skip(ctx))]
pub async fn check(State(ctx): State<AppState>) -> Json<CheckResults> {
    ctx.metrics.count_call("received", "check");
    Json(check_neighbours(&ctx).await)
}

// GET /check_all
/// Synchronous fan-out of `/check` across the selected peer set.
#[tracing::instrument(name = "goldpinger.check_all", skip(ctx))]
pub async fn check_all(State(ctx): State<AppState>) -> Json<CheckAllResults> {
    ctx.metrics.count_call("received", "check_all");
    let peers = ctx.selected_peers().await;
    Json(check_all_pods(&ctx, peers).await)
}

// GET /cluster_health
/// 200 when every peer is reachable, healthy, and agrees on the member set;
/// 418 otherwise. The teapot status is load-bearing: external alert
/// consumers key on it.
#[tracing::instrument(name = "goldpinger.cluster_health", skip(ctx))]
pub async fn cluster_health(
    State(ctx): State<AppState>,
) -> (StatusCode, Json<ClusterHealthResults>) {
    ctx.metrics.count_call("received", "cluster_health");
    let results = check_cluster(&ctx).await;
    let status = if results.ok {
        StatusCode::OK
    } else {
        StatusCode::IM_A_TEAPOT
    };
    (status, Json(results))
}

// GET /healthz
#[tracing::instrument(name = "goldpinger.healthz", skip(ctx))]
pub async fn healthz(State(ctx): State<AppState>) -> impl IntoResponse {
    ctx.metrics.count_call("received", "healthz");
    let results = health_check();
    let status = if results.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(results))
}

// GET /metrics
pub async fn metrics(State(ctx): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        ctx.metrics.render(),
    )
}

#[derive(Debug, Deserialize)]
pub struct HeatmapParams {
    t0: Option<String>,
    t1: Option<String>,
    t2: Option<String>,
}

// GET /heatmap.png
/// The full ping matrix as a PNG; `t0`/`t1`/`t2` override the latency
/// thresholds in milliseconds.
#[tracing::instrument(name = "goldpinger.heatmap", skip(ctx))]
pub async fn heatmap(
    State(ctx): State<AppState>,
    Query(params): Query<HeatmapParams>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.metrics.count_call("received", "heatmap");

    let thresholds = override_thresholds(
        DEFAULT_THRESHOLDS,
        [
            params.t0.as_deref(),
            params.t1.as_deref(),
            params.t2.as_deref(),
        ],
    );

    // The heatmap wants the whole matrix, so it aggregates over the full
    // membership rather than this instance's selection.
    let peers = ctx.all_peers().await;
    let results = check_all_pods(&ctx, peers).await;
    let png_bytes = render_heatmap(&results, thresholds)?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png_bytes))
}
