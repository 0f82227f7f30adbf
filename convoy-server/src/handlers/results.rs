use axum::{extract::State, response::Json};
use convoy_core::OffloadOutcome;
use convoy_model::ResultBlobReference;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::parse_conversation;
use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Deserialize)]
pub struct OffloadRequest {
    pub conversation_id: String,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OffloadResponse {
    Inline { payload: Value },
    Offloaded { blob_ref: ResultBlobReference },
}

impl From<OffloadOutcome> for OffloadResponse {
    fn from(outcome: OffloadOutcome) -> Self {
        match outcome {
            OffloadOutcome::Inline(payload) => Self::Inline { payload },
            OffloadOutcome::Offloaded(blob_ref) => Self::Offloaded { blob_ref },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub payload: Value,
}

pub async fn offload_handler(
    State(state): State<AppState>,
    Json(request): Json<OffloadRequest>,
) -> AppResult<Json<OffloadResponse>> {
    let conversation_id = parse_conversation(&request.conversation_id)?;
    let outcome = state
        .coordinator()
        .offload_result(&conversation_id, request.payload)
        .await;
    Ok(Json(outcome.into()))
}

pub async fn resolve_handler(
    State(state): State<AppState>,
    Json(reference): Json<ResultBlobReference>,
) -> AppResult<Json<ResolveResponse>> {
    state
        .coordinator()
        .resolve_result(&reference)
        .await
        .map(|payload| Json(ResolveResponse { payload }))
        .ok_or_else(|| AppError::not_found(format!("result {} is unavailable", reference.url)))
}
