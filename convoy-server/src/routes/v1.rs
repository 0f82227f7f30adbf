use axum::{
    Router,
    routing::{get, post, put},
};

use crate::{
    handlers::{analysis, counters, jobs, metrics, progress, rate_limit, results},
    infra::app_state::AppState,
};

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .merge(create_job_routes())
        .merge(create_progress_routes())
        .merge(create_coordination_routes())
}

fn create_job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(jobs::create_job_handler))
        .route(
            "/jobs/{id}",
            get(jobs::get_job_handler).patch(jobs::update_job_handler),
        )
        .route("/jobs/{id}/complete", post(jobs::complete_job_handler))
        .route("/jobs/{id}/fail", post(jobs::fail_job_handler))
        .route(
            "/conversations/{id}/job",
            get(jobs::job_by_conversation_handler),
        )
}

fn create_progress_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/conversations/{id}/progress",
            get(progress::read_progress_handler).put(progress::report_progress_handler),
        )
        .route(
            "/conversations/{id}/progress/stream",
            get(progress::progress_stream_handler),
        )
        .route(
            "/conversations/{id}/delivery",
            post(progress::deliver_handler),
        )
}

fn create_coordination_routes() -> Router<AppState> {
    Router::new()
        .route("/rate-limit/admit", post(rate_limit::admit_handler))
        .route(
            "/counters/{kind}",
            get(counters::get_counter_handler).put(counters::set_counter_handler),
        )
        .route(
            "/counters/{kind}/increment",
            post(counters::increment_counter_handler),
        )
        .route("/counters/{kind}/slots", get(counters::counter_slots_handler))
        .route("/results", post(results::offload_handler))
        .route("/results/resolve", post(results::resolve_handler))
        .route(
            "/metrics/completions",
            post(metrics::record_completion_handler),
        )
        .route("/metrics", get(metrics::metrics_handler))
        .route(
            "/analysis/{id}",
            get(analysis::get_analysis_handler).put(analysis::put_analysis_handler),
        )
}
