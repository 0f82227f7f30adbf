//! Monotonic business counters with redundant backups.
//!
//! Each counter has a main slot without expiry and three backup slots with
//! a long TTL. The observed value is the maximum across all four, so losing
//! the main slot (eviction, accidental delete) never moves a counter
//! backwards: the next read writes the best backup back into it.

use std::{sync::Arc, time::Duration};

use convoy_model::{BACKUP_SLOTS, CounterKind, ProtectedCounter};
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    keys::StoreKeys,
    store::{Store, StoreEntry},
};

pub const DEFAULT_BACKUP_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);

pub struct CounterStore {
    store: Arc<dyn Store>,
    backup_ttl: Duration,
}

impl std::fmt::Debug for CounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterStore")
            .field("backup_ttl", &self.backup_ttl)
            .finish()
    }
}

fn parse_slot(kind: CounterKind, slot: usize, raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(counter = %kind, slot, raw, "Ignoring unreadable counter slot");
            None
        }
    }
}

impl CounterStore {
    pub fn new(store: Arc<dyn Store>, backup_ttl: Duration) -> Self {
        Self { store, backup_ttl }
    }

    /// Every slot of `kind`, read in one round trip.
    pub async fn snapshot(&self, kind: CounterKind) -> Result<ProtectedCounter> {
        let mut values = self
            .store
            .get_many(&StoreKeys::counter_slots(kind))
            .await?
            .into_iter();

        let main_value = parse_slot(kind, 0, values.next().flatten());
        let mut backups = [None; BACKUP_SLOTS];
        for (index, slot) in backups.iter_mut().enumerate() {
            *slot = parse_slot(kind, index + 1, values.next().flatten());
        }

        Ok(ProtectedCounter {
            kind,
            main_value,
            backups,
        })
    }

    /// Effective value, healing the main slot from a backup when needed.
    pub async fn get(&self, kind: CounterKind) -> Result<u64> {
        let snapshot = self.snapshot(kind).await?;
        if snapshot.needs_heal() {
            let healed = snapshot.best_backup();
            warn!(
                counter = %kind,
                main = ?snapshot.main_value,
                healed,
                "Main counter slot lost, restoring from backup"
            );
            if let Err(err) = self
                .store
                .set(&StoreKeys::counter(kind), &healed.to_string(), None)
                .await
            {
                warn!(counter = %kind, error = %err, "Failed to restore main counter slot");
            }
        }
        Ok(snapshot.effective())
    }

    pub async fn increment(&self, kind: CounterKind, by: u64) -> Result<u64> {
        let current = self.get(kind).await?;
        let Some(next) = current.checked_add(by) else {
            warn!(counter = %kind, current, by, "Rejected counter increment that would overflow");
            return Ok(current);
        };
        self.write_all(kind, next).await?;
        debug!(counter = %kind, value = next, "Counter incremented");
        Ok(next)
    }

    /// Raise the counter to `value`. Lower values are rejected and the
    /// current value is returned unchanged.
    pub async fn set(&self, kind: CounterKind, value: u64) -> Result<u64> {
        let current = self.get(kind).await?;
        if value < current {
            warn!(counter = %kind, current, requested = value, "Rejected counter decrease");
            return Ok(current);
        }
        self.write_all(kind, value).await?;
        Ok(value)
    }

    /// Re-write every counter's effective value into its backup slots,
    /// renewing their TTL. Returns how many counters were refreshed.
    pub async fn refresh_backups(&self) -> Result<usize> {
        let mut refreshed = 0;
        for kind in CounterKind::ALL {
            let value = self.get(kind).await?;
            if value == 0 {
                continue;
            }
            let entries: Vec<StoreEntry> = (1..=BACKUP_SLOTS)
                .map(|slot| {
                    StoreEntry::new(
                        StoreKeys::counter_backup(kind, slot),
                        value.to_string(),
                        Some(self.backup_ttl),
                    )
                })
                .collect();
            self.store.set_many(&entries).await?;
            refreshed += 1;
        }
        info!(refreshed, "Counter backups refreshed");
        Ok(refreshed)
    }

    async fn write_all(&self, kind: CounterKind, value: u64) -> Result<()> {
        let value = value.to_string();
        let entries: Vec<StoreEntry> = std::iter::once(StoreEntry::new(
            StoreKeys::counter(kind),
            value.clone(),
            None,
        ))
        .chain((1..=BACKUP_SLOTS).map(|slot| {
            StoreEntry::new(
                StoreKeys::counter_backup(kind, slot),
                value.clone(),
                Some(self.backup_ttl),
            )
        }))
        .collect();
        self.store.set_many(&entries).await?;
        Ok(())
    }
}
