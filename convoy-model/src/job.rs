use chrono::{DateTime, Utc};
use serde_json::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    clamp_progress,
    error::ModelError,
    ids::{ConversationId, JobId},
};

/// Coarse lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// Job record persisted under `job:{id}`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Job {
    pub id: JobId,
    pub conversation_id: ConversationId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub started_at: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub finished_at: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub error: Option<String>,
    pub progress: u8,
    #[cfg_attr(feature = "serde", serde(default))]
    pub current_chunk: Option<u32>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub total_chunks: Option<u32>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub result: Option<Value>,
    /// Optimistic concurrency token, bumped on every successful write.
    #[cfg_attr(feature = "serde", serde(default))]
    pub version: u64,
}

impl Job {
    pub fn new(
        id: JobId,
        conversation_id: ConversationId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            status: JobStatus::Pending,
            created_at,
            started_at: None,
            finished_at: None,
            error: None,
            progress: 0,
            current_chunk: None,
            total_chunks: None,
            result: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a partial update onto this record. Fields absent from the patch
    /// keep their current value; progress is clamped to `[0, 100]`.
    pub fn apply(&mut self, patch: &JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(finished_at) = patch.finished_at {
            self.finished_at = Some(finished_at);
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
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
        if let Some(result) = &patch.result {
            self.result = Some(result.clone());
        }
    }
}

/// Partial job update. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Raw progress; clamped when applied.
    pub progress: Option<i64>,
    pub current_chunk: Option<u32>,
    pub total_chunks: Option<u32>,
    pub result: Option<Value>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: i64) -> Self {
        self.progress = Some(progress);
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

    pub fn is_empty(&self) -> bool {
        self == &JobPatch::default()
    }
}
