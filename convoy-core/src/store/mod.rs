//! Key/value store seam.
//!
//! Every coordination record lives behind the [`Store`] trait. The shared
//! deployment talks to Redis through [`RemoteStore`]; [`LocalStore`] keeps a
//! process-local copy of the same semantics and is used when the shared
//! store cannot be reached. [`ResilientStore`] decides between the two, so
//! nothing above this module branches on availability.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

pub mod connector;
pub mod local;
pub mod remote;
pub mod resilient;
pub mod versioned;

pub use connector::{ConnectionSettings, RedisConnector};
pub use local::LocalStore;
pub use remote::RemoteStore;
pub use resilient::ResilientStore;
pub use versioned::{Loaded, Mutation, UpdateOutcome, Versioned, WriteGuard};

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The backend could not be reached. Callers holding a fallback should
    /// switch to it.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with an error.
    #[error("store backend error: {0}")]
    Backend(String),

    /// The backend rejects server-side scripting.
    #[error("server-side scripting unsupported: {0}")]
    ScriptUnsupported(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which implementation actually served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Remote,
    Local,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Remote => f.write_str("remote"),
            StoreBackend::Local => f.write_str("local"),
        }
    }
}

/// One write of a multi-key batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub key: String,
    pub value: String,
    pub ttl: Option<Duration>,
}

impl StoreEntry {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }
}

/// Arguments of one sliding-window admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRequest {
    pub now_ms: i64,
    pub window_ms: u64,
    pub max: u32,
    /// Unique member recorded for this request.
    pub member: String,
}

impl WindowRequest {
    /// Timestamps at or below this are outside the trailing window.
    pub fn cutoff_ms(&self) -> i64 {
        self.now_ms
            .saturating_sub(i64::try_from(self.window_ms).unwrap_or(i64::MAX))
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> StoreBackend;

    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Values in the same order as `keys`, fetched in one round trip.
    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    /// `ttl = None` stores the value without expiry.
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    async fn set_many(&self, entries: &[StoreEntry]) -> StoreResult<()>;

    /// Compare-and-set on the `version` field of a JSON record. Returns
    /// `false` when the stored record does not satisfy `guard`.
    async fn set_versioned(
        &self,
        key: &str,
        guard: WriteGuard,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Returns how many keys were removed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64>;

    /// Purge entries older than the window, then record `request.member`
    /// iff fewer than `request.max` entries remain.
    async fn window_admit(
        &self,
        key: &str,
        request: &WindowRequest,
    ) -> StoreResult<bool>;
}

/// Millisecond TTL as the backends expect it; never zero, since a zero
/// expiry deletes the key outright.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
