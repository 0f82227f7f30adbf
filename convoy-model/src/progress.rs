use chrono::{DateTime, Utc};
use serde_json::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    blob::ResultBlobReference, clamp_progress, error::ModelError,
    ids::ConversationId,
};

/// Pipeline stage reported through the progress tracker.
///
/// Stages advance `starting → parsing → media → chunking → analyzing →
/// finalizing → completed`; `error` is reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ProgressStatus {
    Starting,
    Parsing,
    Media,
    Chunking,
    Analyzing,
    Finalizing,
    Completed,
    Error,
}

impl ProgressStatus {
    pub const PIPELINE: [ProgressStatus; 7] = [
        ProgressStatus::Starting,
        ProgressStatus::Parsing,
        ProgressStatus::Media,
        ProgressStatus::Chunking,
        ProgressStatus::Analyzing,
        ProgressStatus::Finalizing,
        ProgressStatus::Completed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Error)
    }

    fn stage(self) -> usize {
        Self::PIPELINE
            .iter()
            .position(|status| *status == self)
            .unwrap_or(usize::MAX)
    }

    /// Whether a record currently in `self` may move to `next`.
    ///
    /// Staying put and moving forward are allowed, `error` is allowed from
    /// any non-terminal stage and `starting` opens a fresh run even after a
    /// terminal stage. Everything else is a stale or out-of-order write.
    pub fn allows(self, next: ProgressStatus) -> bool {
        if next == ProgressStatus::Starting {
            return self == ProgressStatus::Starting || self.is_terminal();
        }
        if self.is_terminal() {
            return self == next;
        }
        if next == ProgressStatus::Error {
            return true;
        }
        next.stage() >= self.stage()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::Starting => "starting",
            ProgressStatus::Parsing => "parsing",
            ProgressStatus::Media => "media",
            ProgressStatus::Chunking => "chunking",
            ProgressStatus::Analyzing => "analyzing",
            ProgressStatus::Finalizing => "finalizing",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for ProgressStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PIPELINE
            .iter()
            .chain(std::iter::once(&ProgressStatus::Error))
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| ModelError::UnknownStatus(s.to_string()))
    }
}

/// Conversation-keyed progress record persisted under `progress:{id}`.
///
/// `result` and `blob_ref` are never both set.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProgressRecord {
    pub conversation_id: ConversationId,
    pub status: ProgressStatus,
    pub progress: u8,
    #[cfg_attr(feature = "serde", serde(default))]
    pub current_chunk: Option<u32>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub total_chunks: Option<u32>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub message: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub error: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub result: Option<Value>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub blob_ref: Option<ResultBlobReference>,
    pub updated_at: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub version: u64,
}

impl ProgressRecord {
    pub fn new(conversation_id: ConversationId, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            status: ProgressStatus::Starting,
            progress: 0,
            current_chunk: None,
            total_chunks: None,
            message: None,
            error: None,
            result: None,
            blob_ref: None,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some() || self.blob_ref.is_some()
    }

    /// Merge every field of `patch` except the result payload, which goes
    /// through [`ProgressRecord::attach_inline`] or
    /// [`ProgressRecord::attach_blob`] once the offload decision is made.
    pub fn apply(&mut self, patch: &ProgressPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = clamp_progress(progress);
        }
        if let Some(chunk) = patch.current_chunk {
            self.current_chunk = Some(chunk);
        }
        if let Some(total) = patch.total_chunks {
            self.total_chunks = Some(total);
        }
        if let Some(message) = &patch.message {
            self.message = Some(message.clone());
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
        }
        self.updated_at = now;
    }

    pub fn attach_inline(&mut self, result: Value) {
        self.result = Some(result);
        self.blob_ref = None;
    }

    pub fn attach_blob(&mut self, reference: ResultBlobReference) {
        self.blob_ref = Some(reference);
        self.result = None;
    }
}

/// Partial progress update. `None` means "keep the previous value".
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ProgressPatch {
    pub status: Option<ProgressStatus>,
    /// Raw progress; clamped when applied.
    pub progress: Option<i64>,
    pub current_chunk: Option<u32>,
    pub total_chunks: Option<u32>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

impl ProgressPatch {
    pub fn stage(status: ProgressStatus, progress: i64) -> Self {
        Self {
            status: Some(status),
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_chunks(mut self, current: u32, total: u32) -> Self {
        self.current_chunk = Some(current);
        self.total_chunks = Some(total);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}
