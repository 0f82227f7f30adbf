use std::{sync::Arc, time::Duration};

use convoy_model::{AdmissionDecision, RateLimitRule};
use tracing::{debug, info};

use crate::{
    error::{CoordinationError, Result},
    keys::StoreKeys,
    random_suffix,
    store::{Store, WindowRequest},
    time::TimeProvider,
};

/// Sliding-window limiter over the shared store.
///
/// Admission is decided by one atomic script on the shared store. While the
/// store is unavailable decisions come from this worker's local window, so
/// the effective limit across a fleet is temporarily `max` per worker.
pub struct RateLimiter {
    store: Arc<dyn Store>,
    clock: Arc<dyn TimeProvider>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("backend", &self.store.backend())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn TimeProvider>) -> Self {
        Self { store, clock }
    }

    /// Admit one request for `key` iff fewer than `max` were admitted in
    /// the trailing `window`.
    pub async fn admit(&self, key: &str, max: u32, window: Duration) -> Result<bool> {
        if key.is_empty() {
            return Err(CoordinationError::InvalidInput(
                "rate limit key must not be empty".to_string(),
            ));
        }
        if max == 0 {
            debug!(key, "Rate limit with max=0 rejects everything");
            return Ok(false);
        }

        let now_ms = self.clock.unix_millis();
        let request = WindowRequest {
            now_ms,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1),
            max,
            member: format!("{now_ms}-{}", random_suffix(8)),
        };
        let allowed = self
            .store
            .window_admit(&StoreKeys::rate_limit(key), &request)
            .await?;

        if !allowed {
            info!(key, max, window_ms = request.window_ms, "Rate limit exceeded");
        }
        Ok(allowed)
    }

    pub async fn admit_rule(&self, key: &str, rule: &RateLimitRule) -> Result<AdmissionDecision> {
        let allowed = self.admit(key, rule.max, rule.window).await?;
        Ok(AdmissionDecision {
            key: key.to_string(),
            allowed,
            max: rule.max,
            window_ms: u64::try_from(rule.window.as_millis()).unwrap_or(u64::MAX),
        })
    }
}
