use std::time::Duration;

use axum::{extract::State, response::Json};
use convoy_model::AdmissionDecision;
use serde::Deserialize;

use crate::infra::{app_state::AppState, errors::AppResult};

/// Missing limits fall back to the configured default rule.
#[derive(Debug, Deserialize)]
pub struct AdmitRequest {
    pub key: String,
    #[serde(default)]
    pub max: Option<u32>,
    #[serde(default)]
    pub window_ms: Option<u64>,
}

pub async fn admit_handler(
    State(state): State<AppState>,
    Json(request): Json<AdmitRequest>,
) -> AppResult<Json<AdmissionDecision>> {
    let rule = &state.coordinator().settings().default_rule;
    let max = request.max.unwrap_or(rule.max);
    let window = request
        .window_ms
        .map(Duration::from_millis)
        .unwrap_or(rule.window);

    let allowed = state
        .coordinator()
        .admit_request(&request.key, max, window)
        .await?;
    Ok(Json(AdmissionDecision {
        key: request.key,
        allowed,
        max,
        window_ms: window.as_millis() as u64,
    }))
}
