pub mod analysis;
pub mod counters;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod progress;
pub mod rate_limit;
pub mod results;

use axum::http::HeaderMap;
use convoy_model::ConversationId;

use crate::infra::errors::AppResult;

pub const CLIENT_ID_HEADER: &str = "x-client-id";

pub(crate) fn parse_conversation(raw: &str) -> AppResult<ConversationId> {
    Ok(ConversationId::parse(raw)?)
}

/// Caller identity for per-client limits, when the client sent one.
pub(crate) fn client_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
