use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Number of redundant backup slots kept per protected counter.
pub const BACKUP_SLOTS: usize = 3;

/// Business counters guarded by the backup/self-heal policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CounterKind {
    JobsCreated,
    JobsCompleted,
    JobsFailed,
    ResultsDelivered,
}

impl CounterKind {
    pub const ALL: [CounterKind; 4] = [
        CounterKind::JobsCreated,
        CounterKind::JobsCompleted,
        CounterKind::JobsFailed,
        CounterKind::ResultsDelivered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CounterKind::JobsCreated => "jobs_created",
            CounterKind::JobsCompleted => "jobs_completed",
            CounterKind::JobsFailed => "jobs_failed",
            CounterKind::ResultsDelivered => "results_delivered",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CounterKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| ModelError::UnknownCounter(s.to_string()))
    }
}

/// Snapshot of every slot of a protected counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProtectedCounter {
    pub kind: CounterKind,
    pub main_value: Option<u64>,
    pub backups: [Option<u64>; BACKUP_SLOTS],
}

impl ProtectedCounter {
    /// The value callers observe: the maximum across every slot.
    pub fn effective(&self) -> u64 {
        self.backups
            .iter()
            .flatten()
            .copied()
            .chain(self.main_value)
            .max()
            .unwrap_or(0)
    }

    /// Largest value held by any backup slot.
    pub fn best_backup(&self) -> u64 {
        self.backups.iter().flatten().copied().max().unwrap_or(0)
    }

    /// The main slot is gone or zeroed while a backup still remembers more.
    pub fn needs_heal(&self) -> bool {
        self.main_value.unwrap_or(0) == 0 && self.best_backup() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_is_max_of_all_slots() {
        let counter = ProtectedCounter {
            kind: CounterKind::JobsCompleted,
            main_value: Some(4),
            backups: [Some(7), None, Some(5)],
        };
        assert_eq!(counter.effective(), 7);
        assert!(!counter.needs_heal());
    }

    #[test]
    fn missing_main_with_positive_backup_needs_heal() {
        let counter = ProtectedCounter {
            kind: CounterKind::JobsCompleted,
            main_value: None,
            backups: [None, Some(3), None],
        };
        assert_eq!(counter.effective(), 3);
        assert!(counter.needs_heal());
    }

    #[test]
    fn kind_parses_from_wire_name() {
        assert_eq!(
            "jobs_completed".parse::<CounterKind>().unwrap(),
            CounterKind::JobsCompleted
        );
        assert!("visits".parse::<CounterKind>().is_err());
    }
}
