use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use convoy_model::{Job, JobId, JobPatch};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{client_id, parse_conversation};
use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub conversation_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteJobRequest {
    pub result: Value,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FailJobRequest {
    pub error: String,
}

/// Admission is keyed by `x-client-id` when present, otherwise by the
/// conversation the job is created for.
pub async fn create_job_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateJobRequest>,
) -> AppResult<(StatusCode, Json<Job>)> {
    let conversation_id = parse_conversation(&request.conversation_id)?;
    let caller = client_id(&headers).unwrap_or_else(|| conversation_id.to_string());

    let decision = state
        .coordinator()
        .admit_default(&format!("jobs:{caller}"))
        .await?;
    if !decision.allowed {
        info!(caller = %caller, "Job creation rate limited");
        return Err(AppError::rate_limited(format!(
            "Too many job requests; at most {} per {} ms",
            decision.max, decision.window_ms
        )));
    }

    let job = state.coordinator().create_job(&conversation_id).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Job>> {
    state
        .coordinator()
        .get_job(&JobId::from_raw(id.clone()))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("job {id} not found")))
}

pub async fn job_by_conversation_handler(
    State(state): State<AppState>,
    Path(conversation): Path<String>,
) -> AppResult<Json<Job>> {
    let conversation_id = parse_conversation(&conversation)?;
    state
        .coordinator()
        .get_job_by_conversation(&conversation_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no job for conversation {conversation_id}")))
}

pub async fn update_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<JobPatch>,
) -> AppResult<Json<Job>> {
    state
        .coordinator()
        .update_job(&JobId::from_raw(id.clone()), &patch)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("job {id} not found")))
}

pub async fn complete_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CompleteJobRequest>,
) -> AppResult<Json<Job>> {
    let job = state
        .coordinator()
        .complete_job(
            &JobId::from_raw(id),
            request.result,
            request.duration_ms.map(Duration::from_millis),
        )
        .await?;
    Ok(Json(job))
}

pub async fn fail_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<FailJobRequest>,
) -> AppResult<Json<Job>> {
    if request.error.trim().is_empty() {
        return Err(AppError::bad_request("error message must not be empty"));
    }
    let job = state
        .coordinator()
        .fail_job(&JobId::from_raw(id), &request.error)
        .await?;
    Ok(Json(job))
}
