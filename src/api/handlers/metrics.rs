use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;

use crate::AppState;

pub async fn render(State(state): State<AppState>) -> impl IntoResponse {
    // keeps the queue gauges current for each scrape
    if let Err(e) = state.queue.stats().await {
        tracing::warn!(error = %e, "Queue stats unavailable during scrape");
    }
    let body = state.metrics_handle.render();
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
