use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{
    Store, StoreBackend, StoreEntry, StoreError, StoreResult, WindowRequest,
    WriteGuard, ttl_millis, versioned::stored_version,
};
use crate::time::TimeProvider;

#[derive(Debug)]
enum LocalValue {
    Text(String),
    /// Admission timestamps in arrival order.
    Window(VecDeque<i64>),
}

#[derive(Debug)]
struct LocalEntry {
    value: LocalValue,
    expires_at_ms: Option<i64>,
}

impl LocalEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

/// Process-local store with the same semantics as the shared one.
///
/// Data written here is visible to this worker only. It exists so a worker
/// keeps serving while the shared store is away, not as a replacement.
pub struct LocalStore {
    clock: Arc<dyn TimeProvider>,
    entries: Mutex<HashMap<String, LocalEntry>>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

impl LocalStore {
    pub fn new(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| {
            let millis = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
            self.clock.unix_millis().saturating_add(millis)
        })
    }

    /// Drop every expired entry. Reads expire lazily; this bounds memory
    /// during long outages.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.unix_millis();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Swept expired local entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_text(
        entries: &mut HashMap<String, LocalEntry>,
        key: &str,
        now: i64,
    ) -> StoreResult<Option<String>> {
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        match entries.get(key) {
            None => Ok(None),
            Some(LocalEntry {
                value: LocalValue::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Backend(format!(
        "key {key} holds a value of the wrong kind for this operation"
    ))
}

#[async_trait]
impl Store for LocalStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Local
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.unix_millis();
        let mut entries = self.entries.lock();
        Self::read_text(&mut entries, key, now)
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        let now = self.clock.unix_millis();
        let mut entries = self.entries.lock();
        keys.iter()
            .map(|key| Self::read_text(&mut entries, key, now))
            .collect()
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let entry = LocalEntry {
            value: LocalValue::Text(value.to_string()),
            expires_at_ms: self.expiry(ttl),
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_many(&self, batch: &[StoreEntry]) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        for item in batch {
            entries.insert(
                item.key.clone(),
                LocalEntry {
                    value: LocalValue::Text(item.value.clone()),
                    expires_at_ms: self.expiry(item.ttl),
                },
            );
        }
        Ok(())
    }

    async fn set_versioned(
        &self,
        key: &str,
        guard: WriteGuard,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let now = self.clock.unix_millis();
        let mut entries = self.entries.lock();
        let current = Self::read_text(&mut entries, key, now)?;
        let current_version = current.as_deref().and_then(stored_version);
        if !guard.admits(current_version) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            LocalEntry {
                value: LocalValue::Text(value.to_string()),
                expires_at_ms: self.expiry(ttl),
            },
        );
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = self.clock.unix_millis();
        let expires_at = self.expiry(Some(ttl));
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at_ms = expires_at;
                Ok(true)
            }
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let now = self.clock.unix_millis();
        let mut entries = self.entries.lock();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key)
                && !entry.is_expired(now)
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let now = self.clock.unix_millis();
        let mut entries = self.entries.lock();
        let current = Self::read_text(&mut entries, key, now)?;
        let current = match current {
            Some(text) => text.parse::<i64>().map_err(|_| {
                StoreError::Backend(format!("value at {key} is not an integer"))
            })?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            StoreError::Backend(format!("increment at {key} would overflow"))
        })?;
        // Incrementing keeps an existing expiry, like the shared store does.
        let expires_at_ms = entries.get(key).and_then(|entry| entry.expires_at_ms);
        entries.insert(
            key.to_string(),
            LocalEntry {
                value: LocalValue::Text(next.to_string()),
                expires_at_ms,
            },
        );
        Ok(next)
    }

    async fn window_admit(
        &self,
        key: &str,
        request: &WindowRequest,
    ) -> StoreResult<bool> {
        let cutoff = request.cutoff_ms();
        let window_ms = i64::try_from(request.window_ms.max(1)).unwrap_or(i64::MAX);
        let mut entries = self.entries.lock();

        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(request.now_ms))
        {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert_with(|| LocalEntry {
            value: LocalValue::Window(VecDeque::new()),
            expires_at_ms: None,
        });
        let LocalValue::Window(log) = &mut entry.value else {
            return Err(wrong_type(key));
        };

        while log.front().is_some_and(|stamp| *stamp <= cutoff) {
            log.pop_front();
        }
        if log.len() >= request.max as usize {
            return Ok(false);
        }
        log.push_back(request.now_ms);
        entry.expires_at_ms = Some(request.now_ms.saturating_add(window_ms));
        Ok(true)
    }
}
