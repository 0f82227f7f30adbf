use axum::{extract::State, response::Json};
use convoy_core::Store;
use serde::Serialize;

use crate::infra::app_state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` when served by the shared store, `degraded` on the local
    /// fallback.
    pub status: &'static str,
    pub backend: String,
    pub redis: &'static str,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let redis = match &state.connector {
        Some(connector) if connector.health_check().await => "connected",
        Some(_) => "unavailable",
        None => "not_configured",
    };
    let backend = state.store.backend();
    let status = if redis == "connected" && !state.store.is_degraded() {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        backend: backend.to_string(),
        redis,
    })
}
