use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use metrics::gauge;
use serde_json::json;

use crate::AppState;

/// POST /api/control/pause: workers stop claiming. In-flight jobs finish.
pub async fn pause(State(state): State<AppState>) -> impl IntoResponse {
    state.pause_flag.store(true, Ordering::Relaxed);
    gauge!("paused").set(1.0);
    tracing::warn!("Queue workers PAUSED via control API");
    (StatusCode::OK, Json(json!({ "status": "paused" })))
}

/// POST /api/control/resume
pub async fn resume(State(state): State<AppState>) -> impl IntoResponse {
    state.pause_flag.store(false, Ordering::Relaxed);
    gauge!("paused").set(0.0);
    tracing::info!("Queue workers RESUMED via control API");
    (StatusCode::OK, Json(json!({ "status": "running" })))
}

/// GET /api/control/status
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let paused = state.pause_flag.load(Ordering::Relaxed);
    let mode = if state.config.is_live() { "live" } else { "dry_run" };
    let queue = state.queue.stats().await.ok();

    Json(json!({
        "mode": mode,
        "paused": paused,
        "workers": state.config.worker_count,
        "queue": queue,
    }))
}
