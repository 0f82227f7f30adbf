#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Running completion statistics, updated incrementally.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CompletionAggregate {
    pub total_count: u64,
    pub average_duration_ms: f64,
    pub version: u64,
}

impl CompletionAggregate {
    /// Fold one more duration into the online mean.
    pub fn record(&mut self, duration_ms: f64) {
        self.total_count += 1;
        self.average_duration_ms +=
            (duration_ms - self.average_duration_ms) / self.total_count as f64;
    }
}

/// Result-cache effectiveness.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl CacheMetrics {
    pub fn from_counts(hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            hits,
            misses,
            hit_rate,
        }
    }
}
