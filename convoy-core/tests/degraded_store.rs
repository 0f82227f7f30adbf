use std::{sync::Arc, time::Duration};

use convoy_core::{
    ConnectionSettings, Coordinator, CoordinatorSettings, LocalStore, MemoryBlobStore,
    RedisConnector, RemoteStore, ResilientStore, Store, StoreBackend, TimeProvider,
    VirtualTimeProvider,
    model::{ConversationId, ProgressPatch, ProgressStatus},
};
use serde_json::json;

fn unreachable_settings() -> ConnectionSettings {
    ConnectionSettings {
        connect_timeout: Duration::from_millis(200),
        command_timeout: Duration::from_millis(200),
        max_connect_attempts: 1,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(1),
        cooldown: Duration::from_secs(60),
        ..ConnectionSettings::default()
    }
}

/// A store wired to a port nothing listens on.
fn degraded_store(clock: Arc<dyn TimeProvider>) -> Arc<ResilientStore> {
    let connector = Arc::new(
        RedisConnector::new("redis://127.0.0.1:1/", unreachable_settings())
            .expect("url parses"),
    );
    let remote = Arc::new(RemoteStore::new(connector));
    Arc::new(ResilientStore::new(remote, Arc::new(LocalStore::new(clock))))
}

#[tokio::test]
async fn unreachable_redis_falls_back_to_local_state() {
    let clock: Arc<dyn TimeProvider> = Arc::new(VirtualTimeProvider::default());
    let store = degraded_store(clock.clone());

    store.set("k", "v", None).await.expect("set falls back");
    assert!(store.is_degraded());
    assert_eq!(store.backend(), StoreBackend::Local);
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    assert_eq!(store.local().get("k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn coordination_keeps_working_while_degraded() {
    let clock: Arc<dyn TimeProvider> = Arc::new(VirtualTimeProvider::default());
    let store = degraded_store(clock.clone());
    let coordinator = Coordinator::new(
        store.clone(),
        Arc::new(MemoryBlobStore::new(clock.clone())),
        clock,
        CoordinatorSettings::default(),
    );
    let conversation = ConversationId::parse("c1").unwrap();

    let job = coordinator.create_job(&conversation).await.expect("create job");
    coordinator
        .report_progress(&conversation, ProgressPatch::stage(ProgressStatus::Analyzing, 50))
        .await
        .expect("report progress");
    coordinator
        .complete_job(&job.id, json!({"summary": "R"}), None)
        .await
        .expect("complete job");

    let progress = coordinator.read_progress(&conversation).await.unwrap().unwrap();
    assert_eq!(progress.status, ProgressStatus::Completed);
    assert_eq!(progress.result, Some(json!({"summary": "R"})));
    assert_eq!(coordinator.store_backend(), StoreBackend::Local);

    for _ in 0..5 {
        assert!(coordinator.admit_default("ip:9").await.unwrap().allowed);
    }
    assert!(!coordinator.admit_default("ip:9").await.unwrap().allowed);
}
