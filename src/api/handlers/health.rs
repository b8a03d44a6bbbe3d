use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db = match &state.db {
        Some(pool) => {
            if sqlx::query("SELECT 1").execute(pool).await.is_ok() {
                "connected"
            } else {
                "disconnected"
            }
        }
        None => "memory",
    };
    let queue = if state.queue.stats().await.is_ok() {
        "connected"
    } else {
        "disconnected"
    };
    let listener = state
        .listener_state
        .as_ref()
        .map(|rx| rx.borrow().as_str())
        .unwrap_or("disabled");

    let healthy = db != "disconnected" && queue != "disconnected";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "db": db,
            "queue": queue,
            "settlementListener": listener,
        })),
    )
}
