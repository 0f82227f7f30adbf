use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::Value;

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

pub async fn get_analysis_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    state
        .coordinator()
        .analysis_cache()
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("analysis {id} not cached")))
}

pub async fn put_analysis_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> AppResult<StatusCode> {
    state.coordinator().analysis_cache().put(&id, &payload).await?;
    Ok(StatusCode::NO_CONTENT)
}
