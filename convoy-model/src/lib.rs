//! Core data model definitions shared across Convoy crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod blob;
pub mod counter;
pub mod error;
pub mod ids;
pub mod job;
pub mod metrics;
pub mod progress;
pub mod rate_limit;

// Intentionally curated re-exports for downstream consumers.
pub use blob::ResultBlobReference;
pub use counter::{BACKUP_SLOTS, CounterKind, ProtectedCounter};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{ConversationId, JobId};
pub use job::{Job, JobPatch, JobStatus};
pub use metrics::{CacheMetrics, CompletionAggregate};
pub use progress::{ProgressPatch, ProgressRecord, ProgressStatus};
pub use rate_limit::{AdmissionDecision, RateLimitRule};

/// Clamp an arbitrary progress figure into the `[0, 100]` percentage range.
pub fn clamp_progress(raw: i64) -> u8 {
    raw.clamp(0, 100) as u8
}
