//! HTTP surface of the Convoy coordination layer.

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
