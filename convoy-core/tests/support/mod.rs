use std::sync::Arc;

use convoy_core::{
    Coordinator, CoordinatorSettings, LocalStore, MemoryBlobStore, OffloadPolicy,
    TimeProvider, VirtualTimeProvider,
};
use tempfile::TempDir;

// Shared by several test binaries; not every one uses every field.
#[allow(unused)]
pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<LocalStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub clock: VirtualTimeProvider,
}

#[allow(unused)]
pub fn harness_with_threshold(inline_threshold_bytes: usize) -> Harness {
    let clock = VirtualTimeProvider::default();
    let time: Arc<dyn TimeProvider> = Arc::new(clock.clone());
    let store = Arc::new(LocalStore::new(time.clone()));
    let blobs = Arc::new(MemoryBlobStore::new(time.clone()));
    let settings = CoordinatorSettings {
        offload: OffloadPolicy {
            inline_threshold_bytes,
            ..OffloadPolicy::default()
        },
        ..CoordinatorSettings::default()
    };
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        blobs.clone(),
        time,
        settings,
    ));
    Harness {
        coordinator,
        store,
        blobs,
        clock,
    }
}

#[allow(unused)]
pub fn harness() -> Harness {
    harness_with_threshold(usize::MAX)
}

#[allow(unused)]
pub fn temp_cache_dir() -> TempDir {
    tempfile::tempdir().expect("create temp cache dir")
}
