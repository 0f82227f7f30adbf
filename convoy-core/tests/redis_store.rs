//! Runs the script and command-sequence paths of `RemoteStore` against a
//! live server. Ignored by default:
//!
//! `CONVOY_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -p convoy-core --test redis_store -- --ignored`

use std::{sync::Arc, time::Duration};

use convoy_core::{
    ConnectionSettings, RedisConnector, RemoteStore, Store,
    store::{WindowRequest, WriteGuard},
};

fn remote_store(scripting: bool) -> RemoteStore {
    let url = std::env::var("CONVOY_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let connector = Arc::new(
        RedisConnector::new(&url, ConnectionSettings::default()).expect("valid Redis URL"),
    );
    RemoteStore::new(connector).with_scripting(scripting)
}

fn unique_key(name: &str, scripting: bool) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("convoy-test:{name}:{scripting}:{}:{nanos}", std::process::id())
}

fn request(now_ms: i64, member: &str) -> WindowRequest {
    WindowRequest {
        now_ms,
        window_ms: 60_000,
        max: 3,
        member: member.to_string(),
    }
}

async fn sliding_window_admits_up_to_max(scripting: bool) {
    let store = remote_store(scripting);
    let key = unique_key("window", scripting);
    let start = 1_700_000_000_000_i64;

    for n in 0..3 {
        let admitted = store
            .window_admit(&key, &request(start + n, &format!("m{n}")))
            .await
            .expect("window admit");
        assert!(admitted, "request {n} should be admitted");
    }
    // Same millisecond as the last admitted request, distinct member.
    assert!(!store.window_admit(&key, &request(start + 2, "m3")).await.unwrap());

    // Once the first entries leave the trailing window there is room again.
    assert!(store.window_admit(&key, &request(start + 60_001, "m4")).await.unwrap());

    store.delete(&[key]).await.unwrap();
}

async fn versioned_writes_honour_their_guard(scripting: bool) {
    let store = remote_store(scripting);
    let key = unique_key("versioned", scripting);
    let ttl = Some(Duration::from_secs(60));

    assert!(store.set_versioned(&key, WriteGuard::Absent, r#"{"version":1}"#, ttl).await.unwrap());
    assert!(!store.set_versioned(&key, WriteGuard::Absent, r#"{"version":1}"#, ttl).await.unwrap());

    assert!(store.set_versioned(&key, WriteGuard::Version(1), r#"{"version":2}"#, ttl).await.unwrap());
    assert!(!store.set_versioned(&key, WriteGuard::Version(1), r#"{"version":2,"lost":true}"#, ttl).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some(r#"{"version":2}"#));

    store.set(&key, "garbage", ttl).await.unwrap();
    assert!(!store.set_versioned(&key, WriteGuard::Version(2), r#"{"version":3}"#, ttl).await.unwrap());
    assert!(store.set_versioned(&key, WriteGuard::Unconditional, r#"{"version":1}"#, ttl).await.unwrap());

    store.delete(&[key]).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn scripted_sliding_window() {
    sliding_window_admits_up_to_max(true).await;
}

#[tokio::test]
#[ignore]
async fn unscripted_sliding_window() {
    sliding_window_admits_up_to_max(false).await;
}

#[tokio::test]
#[ignore]
async fn scripted_versioned_set() {
    versioned_writes_honour_their_guard(true).await;
}

#[tokio::test]
#[ignore]
async fn unscripted_versioned_set() {
    versioned_writes_honour_their_guard(false).await;
}
