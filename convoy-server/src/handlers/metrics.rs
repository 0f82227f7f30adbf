use std::{collections::BTreeMap, time::Duration};

use axum::{extract::State, response::Json};
use convoy_model::{CacheMetrics, CompletionAggregate, CounterKind};
use serde::{Deserialize, Serialize};

use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub completions: CompletionAggregate,
    pub cache: CacheMetrics,
    pub counters: BTreeMap<&'static str, u64>,
}

pub async fn record_completion_handler(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> AppResult<Json<CompletionAggregate>> {
    let aggregate = state
        .coordinator()
        .record_completion(Duration::from_millis(request.duration_ms))
        .await?;
    Ok(Json(aggregate))
}

pub async fn metrics_handler(State(state): State<AppState>) -> AppResult<Json<MetricsResponse>> {
    let coordinator = state.coordinator();
    let mut counters = BTreeMap::new();
    for kind in CounterKind::ALL {
        counters.insert(kind.as_str(), coordinator.get_counter(kind).await?);
    }

    Ok(Json(MetricsResponse {
        completions: coordinator.aggregate().await?,
        cache: coordinator.cache_metrics().await?,
        counters,
    }))
}
