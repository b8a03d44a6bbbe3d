use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::queue::ops::{self, DlqRow};
use crate::queue::QueueStats;
use crate::AppState;

const MAX_PEEK: usize = 500;

#[derive(Debug, Deserialize)]
pub struct DlqQuery {
    pub limit: Option<usize>,
}

/// GET /api/queue/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(state.queue.stats().await?))
}

/// GET /api/queue/dlq?limit=N: the newest N dead letters, oldest of them first.
pub async fn dlq(
    State(state): State<AppState>,
    Query(query): Query<DlqQuery>,
) -> Result<Json<Vec<DlqRow>>, AppError> {
    let limit = query.limit.unwrap_or(50);
    if limit == 0 || limit > MAX_PEEK {
        return Err(AppError::BadRequest(format!("limit must be between 1 and {MAX_PEEK}")));
    }
    Ok(Json(ops::peek(&state.queue, limit).await?))
}
