use std::sync::Arc;

use anyhow::Context;
use convoy_config::Config;
use convoy_core::{
    BlobStore, CacheBlobStore, Coordinator, LocalStore, MaintenanceTasks, MemoryBlobStore,
    RedisConnector, RemoteStore, ResilientStore, SystemTimeProvider, TimeProvider,
};
use tracing::info;

use super::app_state::AppState;

/// Wire the store, blob store and coordinator described by `config`.
/// Nothing is dialled here; the Redis connection is opened on first use.
pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    build_state_with_clock(config, Arc::new(SystemTimeProvider))
}

pub fn build_state_with_clock(
    config: Config,
    clock: Arc<dyn TimeProvider>,
) -> anyhow::Result<AppState> {
    let local = Arc::new(LocalStore::new(clock.clone()));

    let (store, connector) = match &config.redis {
        Some(redis) => {
            let connector = Arc::new(
                RedisConnector::new(&redis.url, redis.connection.clone())
                    .context("invalid Redis configuration")?,
            );
            let remote = Arc::new(RemoteStore::new(connector.clone()));
            info!(url = %redis.url, "Using Redis with local fallback");
            (
                Arc::new(ResilientStore::new(remote, local)),
                Some(connector),
            )
        }
        None => (Arc::new(ResilientStore::local_only(local)), None),
    };

    let blobs: Arc<dyn BlobStore> = match config.blob_root() {
        Some(root) => {
            info!(root = %root.display(), "Using on-disk blob store");
            Arc::new(CacheBlobStore::new(root, clock.clone()))
        }
        None => Arc::new(MemoryBlobStore::new(clock.clone())),
    };

    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        blobs,
        clock,
        config.coordinator.clone(),
    ));

    Ok(AppState {
        coordinator,
        store,
        connector,
        config: Arc::new(config),
    })
}

pub fn spawn_maintenance(state: &AppState) -> MaintenanceTasks {
    MaintenanceTasks::spawn(
        state.coordinator.clone(),
        state.connector.clone(),
        Some(state.store.local().clone()),
        state.config.maintenance,
    )
}
