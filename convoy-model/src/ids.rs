use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Identifier of the conversation an analysis run belongs to.
///
/// Progress records are keyed by this id because clients poll by
/// conversation before they learn the job id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ConversationId(String);

impl ConversationId {
    /// Validate and wrap a raw conversation id. Ids end up inside store keys
    /// and blob names, so whitespace and path separators are rejected.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ModelError::InvalidId(
                "conversation id must not be empty".to_string(),
            ));
        }
        if trimmed.len() > 256 {
            return Err(ModelError::InvalidId(format!(
                "conversation id longer than 256 bytes ({})",
                trimmed.len()
            )));
        }
        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(ModelError::InvalidId(format!(
                "conversation id contains forbidden characters: {trimmed}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally unique job identifier: `{conversation}-{unix_millis}-{suffix}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct JobId(String);

impl JobId {
    pub fn compose(
        conversation_id: &ConversationId,
        unix_millis: i64,
        suffix: &str,
    ) -> Self {
        Self(format!("{}-{}-{}", conversation_id, unix_millis, suffix))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
