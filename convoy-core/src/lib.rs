//! # Convoy Core
//!
//! Coordination layer for long-running, multi-step analysis jobs executed by
//! a fleet of stateless workers. Workers share no memory; every piece of
//! coordination state lives in a shared key/value store that may be
//! unreachable, size-limited or slow.
//!
//! ## Components
//!
//! - [`store`]: the [`Store`](store::Store) seam with Redis, process-local
//!   and failover implementations, plus connection lifecycle.
//! - [`rate_limit`]: per-key sliding-window admission.
//! - [`jobs`]: job records and the conversation → job index.
//! - [`progress`]: merge-on-write progress records and a change stream.
//! - [`offload`]: inline vs. blob storage of results, budget enforcement.
//! - [`counters`]: monotonic counters with self-healing backups.
//! - [`metrics`]: rolling completion average and cache hit rate.
//! - [`analysis_cache`]: cached analysis results.
//! - [`coordinator`]: the facade wiring all of the above.
//! - [`maintenance`]: background upkeep loops.
//!
//! ## Degraded mode
//!
//! When the shared store is unavailable, [`ResilientStore`](store::ResilientStore)
//! serves every call from a [`LocalStore`](store::LocalStore). That state is
//! visible to the current worker only, so consistency across workers is lost
//! until the shared store returns. The transition is logged, not surfaced.
#![allow(missing_docs)]

pub mod analysis_cache;
pub mod coordinator;
pub mod counters;
pub mod error;
pub mod jobs;
pub mod keys;
pub mod maintenance;
pub mod metrics;
pub mod offload;
pub mod progress;
pub mod rate_limit;
pub mod store;
pub mod time;

pub use convoy_model as model;

pub use coordinator::{Coordinator, CoordinatorSettings, Delivery};
pub use error::{CoordinationError, Result};
pub use maintenance::{MaintenanceSettings, MaintenanceTasks};
pub use offload::{BlobStore, CacheBlobStore, MemoryBlobStore, OffloadOutcome, OffloadPolicy};
pub use progress::{ReportOutcome, StreamSettings};
pub use store::{
    ConnectionSettings, LocalStore, RedisConnector, RemoteStore, ResilientStore, Store,
    StoreBackend, StoreError,
};
pub use time::{SystemTimeProvider, TimeProvider, VirtualTimeProvider};

use rand::{Rng, distr::Alphanumeric};

/// Random alphanumeric string used for id suffixes and unique members.
pub(crate) fn random_suffix(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::random_suffix;

    #[test]
    fn suffix_is_alphanumeric_of_requested_length() {
        let suffix = random_suffix(6);
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
