use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    LocalStore, Store, StoreBackend, StoreEntry, StoreResult, WindowRequest,
    WriteGuard,
};

/// Routes every call to the shared store and serves it from the local
/// store while the shared one is unavailable. Errors other than
/// unavailability are returned as is.
pub struct ResilientStore {
    remote: Option<Arc<dyn Store>>,
    local: Arc<LocalStore>,
    degraded: AtomicBool,
}

impl std::fmt::Debug for ResilientStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientStore")
            .field("has_remote", &self.remote.is_some())
            .field("degraded", &self.is_degraded())
            .field("local", &self.local)
            .finish()
    }
}

macro_rules! with_fallback {
    ($self:ident, $op:literal, $store:ident => $call:expr) => {{
        if let Some($store) = $self.remote.as_deref() {
            match $call.await {
                Ok(value) => {
                    $self.mark_recovered();
                    return Ok(value);
                }
                Err(err) if err.is_unavailable() => {
                    $self.mark_degraded($op, &err.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        let $store: &dyn Store = $self.local.as_ref();
        $call.await
    }};
}

impl ResilientStore {
    pub fn new(remote: Arc<dyn Store>, local: Arc<LocalStore>) -> Self {
        Self {
            remote: Some(remote),
            local,
            degraded: AtomicBool::new(false),
        }
    }

    /// No shared store configured: every call is served locally.
    pub fn local_only(local: Arc<LocalStore>) -> Self {
        warn!(
            "No shared store configured; coordination state is local to this \
             worker and will not be seen by other workers"
        );
        Self {
            remote: None,
            local,
            degraded: AtomicBool::new(true),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    fn mark_degraded(&self, op: &str, reason: &str) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                op,
                reason,
                "Shared store unavailable; serving from process-local fallback \
                 (not shared across workers)"
            );
        } else {
            debug!(op, reason, "Shared store still unavailable");
        }
    }

    fn mark_recovered(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!("Shared store reachable again; leaving degraded mode");
        }
    }
}

#[async_trait]
impl Store for ResilientStore {
    fn backend(&self) -> StoreBackend {
        if self.remote.is_some() && !self.is_degraded() {
            StoreBackend::Remote
        } else {
            StoreBackend::Local
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        with_fallback!(self, "ping", store => store.ping())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        with_fallback!(self, "get", store => store.get(key))
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        with_fallback!(self, "get_many", store => store.get_many(keys))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        with_fallback!(self, "set", store => store.set(key, value, ttl))
    }

    async fn set_many(&self, entries: &[StoreEntry]) -> StoreResult<()> {
        with_fallback!(self, "set_many", store => store.set_many(entries))
    }

    async fn set_versioned(
        &self,
        key: &str,
        guard: WriteGuard,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        with_fallback!(
            self,
            "set_versioned",
            store => store.set_versioned(key, guard, value, ttl)
        )
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        with_fallback!(self, "expire", store => store.expire(key, ttl))
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        with_fallback!(self, "delete", store => store.delete(keys))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        with_fallback!(self, "incr_by", store => store.incr_by(key, delta))
    }

    async fn window_admit(
        &self,
        key: &str,
        request: &WindowRequest,
    ) -> StoreResult<bool> {
        with_fallback!(self, "window_admit", store => store.window_admit(key, request))
    }
}
