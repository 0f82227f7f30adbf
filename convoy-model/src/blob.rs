use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pointer to a result payload that was too large to inline.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResultBlobReference {
    pub url: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}
