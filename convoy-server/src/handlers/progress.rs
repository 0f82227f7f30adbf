use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Path, Query, State},
    response::{
        Json, Sse,
        sse::{Event, KeepAlive},
    },
};
use convoy_core::ReportOutcome;
use convoy_model::{Job, ProgressPatch, ProgressRecord, ProgressStatus};
use tokio_stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::parse_conversation;
use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ProgressRecord>,
    /// Stage the record stayed in when the report was dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<ProgressStatus>,
}

impl From<ReportOutcome> for ReportResponse {
    fn from(outcome: ReportOutcome) -> Self {
        match outcome {
            ReportOutcome::Applied(record) => Self {
                applied: true,
                record: Some(record),
                current: None,
            },
            ReportOutcome::Ignored { current, .. } => Self {
                applied: false,
                record: None,
                current: Some(current),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub poll_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub released: bool,
    pub progress: ProgressRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
}

pub async fn report_progress_handler(
    State(state): State<AppState>,
    Path(conversation): Path<String>,
    Json(patch): Json<ProgressPatch>,
) -> AppResult<Json<ReportResponse>> {
    let conversation_id = parse_conversation(&conversation)?;
    let outcome = state
        .coordinator()
        .report_progress(&conversation_id, patch)
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn read_progress_handler(
    State(state): State<AppState>,
    Path(conversation): Path<String>,
) -> AppResult<Json<ProgressRecord>> {
    let conversation_id = parse_conversation(&conversation)?;
    state
        .coordinator()
        .read_progress(&conversation_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no progress for {conversation_id}")))
}

fn progress_event(record: &ProgressRecord) -> Event {
    let name = if record.is_terminal() { "done" } else { "progress" };
    Event::default()
        .event(name)
        .json_data(record)
        .unwrap_or_else(|err| {
            warn!(error = %err, "Failed to encode progress event");
            Event::default().event("error").data("unencodable progress record")
        })
}

/// Server-sent events, one per observed change, ending with the terminal
/// record or at the stream timeout.
pub async fn progress_stream_handler(
    State(state): State<AppState>,
    Path(conversation): Path<String>,
    Query(query): Query<StreamQuery>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let conversation_id = parse_conversation(&conversation)?;
    let settings = state.coordinator().settings().stream.narrowed(
        query.poll_ms.map(Duration::from_millis),
        query.timeout_ms.map(Duration::from_millis),
    );

    let stream = state
        .coordinator()
        .watch_progress(conversation_id, Some(settings))
        .map(|record| Ok(progress_event(&record)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

pub async fn deliver_handler(
    State(state): State<AppState>,
    Path(conversation): Path<String>,
) -> AppResult<Json<DeliveryResponse>> {
    let conversation_id = parse_conversation(&conversation)?;
    let delivery = state
        .coordinator()
        .deliver(&conversation_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no progress for {conversation_id}")))?;
    Ok(Json(DeliveryResponse {
        released: delivery.released,
        progress: delivery.progress,
        job: delivery.job,
    }))
}
