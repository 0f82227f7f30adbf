use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sliding-window limit: at most `max` admissions in any trailing `window`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RateLimitRule {
    /// Name of the rule for identification in logs.
    pub name: String,
    /// Maximum number of requests allowed inside the window.
    pub max: u32,
    /// Trailing window length.
    pub window: Duration,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdmissionDecision {
    pub key: String,
    pub allowed: bool,
    pub max: u32,
    pub window_ms: u64,
}
