use axum::{
    extract::{Path, State},
    response::Json,
};
use convoy_model::{CounterKind, ProtectedCounter};
use serde::{Deserialize, Serialize};

use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Serialize)]
pub struct CounterResponse {
    pub kind: CounterKind,
    pub value: u64,
}

#[derive(Debug, Deserialize)]
pub struct IncrementRequest {
    #[serde(default = "default_step")]
    pub by: u64,
}

fn default_step() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct SetCounterRequest {
    pub value: u64,
}

pub async fn get_counter_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> AppResult<Json<CounterResponse>> {
    let kind: CounterKind = kind.parse()?;
    let value = state.coordinator().get_counter(kind).await?;
    Ok(Json(CounterResponse { kind, value }))
}

pub async fn increment_counter_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<IncrementRequest>,
) -> AppResult<Json<CounterResponse>> {
    let kind: CounterKind = kind.parse()?;
    let value = state.coordinator().increment_counter(kind, request.by).await?;
    Ok(Json(CounterResponse { kind, value }))
}

/// Lower values are refused; the response carries the value that stands.
pub async fn set_counter_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<SetCounterRequest>,
) -> AppResult<Json<CounterResponse>> {
    let kind: CounterKind = kind.parse()?;
    let value = state.coordinator().set_counter(kind, request.value).await?;
    Ok(Json(CounterResponse { kind, value }))
}

pub async fn counter_slots_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> AppResult<Json<ProtectedCounter>> {
    let kind: CounterKind = kind.parse()?;
    Ok(Json(state.coordinator().counter_snapshot(kind).await?))
}
