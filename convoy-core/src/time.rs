//! Clock abstraction so windows and TTL bookkeeping can be driven
//! deterministically in tests.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

pub trait TimeProvider: Send + Sync + 'static {
    fn utc_now(&self) -> DateTime<Utc>;

    fn unix_millis(&self) -> i64 {
        self.utc_now().timestamp_millis()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct VirtualTimeProvider {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl VirtualTimeProvider {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }
}

impl Default for VirtualTimeProvider {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl TimeProvider for VirtualTimeProvider {
    fn utc_now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
