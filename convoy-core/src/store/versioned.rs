//! Optimistic read-modify-write over versioned JSON records.
//!
//! Records carry a `version` that every successful write bumps. A writer
//! reads the record, applies its change and writes back only if the
//! version is still the one it read; otherwise it re-reads and re-applies.
//! Patches are field-level, so a retry merges with the concurrent write
//! instead of overwriting it.

use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use super::Store;
use crate::error::{CoordinationError, Result};

pub const MAX_WRITE_ATTEMPTS: usize = 5;

/// Precondition for a versioned write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuard {
    /// The key must not hold a readable record.
    Absent,
    /// The stored record must carry exactly this version.
    Version(u64),
    /// The stored value is unreadable; overwrite it.
    Unconditional,
}

impl WriteGuard {
    /// Wire form consumed by the versioned-set script.
    pub fn as_arg(&self) -> String {
        match self {
            WriteGuard::Absent => "absent".to_string(),
            WriteGuard::Version(version) => version.to_string(),
            WriteGuard::Unconditional => "any".to_string(),
        }
    }

    /// Evaluate the guard against the `version` of the currently stored
    /// record (`None` when missing or unreadable).
    pub fn admits(&self, current: Option<u64>) -> bool {
        match (self, current) {
            (WriteGuard::Unconditional, _) => true,
            (WriteGuard::Absent, None) => true,
            (WriteGuard::Version(expected), Some(found)) => *expected == found,
            _ => false,
        }
    }
}

/// Version of a stored JSON document as the guard sees it. Documents that
/// are not JSON objects count as absent; objects without a `version` are
/// version 0.
pub fn stored_version(raw: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    Some(
        object
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
    )
}

pub trait Versioned {
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

impl Versioned for convoy_model::Job {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Versioned for convoy_model::ProgressRecord {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Versioned for convoy_model::CompletionAggregate {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// A record as read from the store.
#[derive(Debug)]
pub enum Loaded<T> {
    Missing,
    Malformed,
    Present(T),
}

impl<T> Loaded<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Loaded::Present(record) => Some(record),
            Loaded::Missing | Loaded::Malformed => None,
        }
    }
}

pub async fn read_record<T: DeserializeOwned>(
    store: &dyn Store,
    key: &str,
) -> Result<Loaded<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(Loaded::Missing);
    };
    match serde_json::from_str(&raw) {
        Ok(record) => Ok(Loaded::Present(record)),
        Err(err) => {
            warn!(key, error = %err, "Discarding malformed record");
            Ok(Loaded::Malformed)
        }
    }
}

/// What the caller wants to do with the record it was handed.
#[derive(Debug)]
pub enum Mutation<T> {
    Write { record: T, ttl: Option<Duration> },
    /// Leave the store untouched and report this record.
    Skip(Option<T>),
}

#[derive(Debug)]
pub enum UpdateOutcome<T> {
    Written(T),
    Skipped(Option<T>),
}

/// Run `mutate` against the current record and persist its result with a
/// version check, retrying on conflicts up to [`MAX_WRITE_ATTEMPTS`].
pub async fn update_record<T, F>(
    store: &dyn Store,
    key: &str,
    mut mutate: F,
) -> Result<UpdateOutcome<T>>
where
    T: Serialize + DeserializeOwned + Versioned,
    F: FnMut(Option<T>) -> Mutation<T>,
{
    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        let (current, guard) = match read_record::<T>(store, key).await? {
            Loaded::Missing => (None, WriteGuard::Absent),
            Loaded::Malformed => (None, WriteGuard::Unconditional),
            Loaded::Present(record) => {
                let version = record.version();
                (Some(record), WriteGuard::Version(version))
            }
        };
        let base_version = match guard {
            WriteGuard::Version(version) => version,
            WriteGuard::Absent | WriteGuard::Unconditional => 0,
        };

        let (mut record, ttl) = match mutate(current) {
            Mutation::Write { record, ttl } => (record, ttl),
            Mutation::Skip(record) => return Ok(UpdateOutcome::Skipped(record)),
        };
        record.set_version(base_version + 1);

        let encoded = serde_json::to_string(&record)?;
        if store.set_versioned(key, guard, &encoded, ttl).await? {
            return Ok(UpdateOutcome::Written(record));
        }
        debug!(key, attempt, "Version conflict, re-reading record");
    }

    warn!(
        key,
        attempts = MAX_WRITE_ATTEMPTS,
        "Giving up on contended record"
    );
    Err(CoordinationError::Conflict(key.to_string()))
}
