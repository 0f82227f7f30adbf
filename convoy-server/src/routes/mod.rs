pub mod v1;

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers::health, infra::app_state::AppState};

/// Create the main API router with all versions
pub fn create_api_router() -> Router<AppState> {
    Router::new().nest("/api/v1", v1::create_v1_router())
}

/// The full application: API, health probe and HTTP layers.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::health_handler))
        .merge(create_api_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
