use axum::extract::{Path, State};
use axum::Json;

use crate::db::IntentRecord;
use crate::errors::AppError;
use crate::AppState;

/// GET /api/intents/:key
pub async fn detail(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<IntentRecord>, AppError> {
    state
        .intents
        .get(&key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("intent {key}")))
}
