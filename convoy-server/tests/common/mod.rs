use std::sync::Arc;

use axum_test::TestServer;
use convoy_config::{BlobConfig, Config, ConfigMetadata, ServerConfig};
use convoy_core::{
    CoordinatorSettings, MaintenanceSettings, OffloadPolicy, TimeProvider, VirtualTimeProvider,
};
use convoy_server::{
    AppState,
    infra::startup::build_state_with_clock,
    routes::create_app,
};
use tempfile::TempDir;

// Code is used by test modules, but not in this scope
#[allow(unused)]
#[derive(Debug)]
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub clock: VirtualTimeProvider,
    _tempdir: TempDir,
}

/// Local-only store, on-disk blobs in a temp dir and a virtual clock.
#[allow(unused)]
pub fn build_test_app(inline_threshold_bytes: usize) -> TestApp {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        server: ServerConfig::default(),
        redis: None,
        blobs: BlobConfig {
            root: Some(tempdir.path().join("blobs")),
        },
        coordinator: CoordinatorSettings {
            offload: OffloadPolicy {
                inline_threshold_bytes,
                ..OffloadPolicy::default()
            },
            ..CoordinatorSettings::default()
        },
        maintenance: MaintenanceSettings::default(),
        metadata: ConfigMetadata::default(),
    };

    let clock = VirtualTimeProvider::default();
    let time: Arc<dyn TimeProvider> = Arc::new(clock.clone());
    let state = build_state_with_clock(config, time).expect("state builds");
    let server = TestServer::builder()
        .build(create_app(state.clone()))
        .expect("test server");

    TestApp {
        server,
        state,
        clock,
        _tempdir: tempdir,
    }
}
