use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{Value, json};

mod common;

use common::build_test_app;

async fn create_job(app: &common::TestApp, conversation: &str) -> Value {
    let response = app
        .server
        .post("/api/v1/jobs")
        .json(&json!({ "conversation_id": conversation }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

#[tokio::test]
async fn job_lifecycle_over_http() {
    let app = build_test_app(usize::MAX);
    let job = create_job(&app, "c1").await;
    let job_id = job["id"].as_str().expect("job id").to_string();
    assert_eq!(job["status"], "pending");

    let running = app
        .server
        .patch(&format!("/api/v1/jobs/{job_id}"))
        .json(&json!({ "status": "running" }))
        .await;
    running.assert_status_ok();
    assert_eq!(running.json::<Value>()["status"], "running");

    let report = app
        .server
        .put("/api/v1/conversations/c1/progress")
        .json(&json!({ "status": "analyzing", "progress": 150 }))
        .await;
    report.assert_status_ok();
    let report: Value = report.json();
    assert_eq!(report["applied"], true);
    assert_eq!(report["record"]["progress"], 100);

    let completed = app
        .server
        .post(&format!("/api/v1/jobs/{job_id}/complete"))
        .json(&json!({ "result": { "summary": "R" }, "duration_ms": 1200 }))
        .await;
    completed.assert_status_ok();
    assert_eq!(completed.json::<Value>()["status"], "completed");

    let progress: Value = app
        .server
        .get("/api/v1/conversations/c1/progress")
        .await
        .json();
    assert_eq!(progress["status"], "completed");
    assert_eq!(progress["progress"], 100);
    assert_eq!(progress["result"], json!({ "summary": "R" }));

    let by_conversation = app.server.get("/api/v1/conversations/c1/job").await;
    by_conversation.assert_status_ok();
    assert_eq!(by_conversation.json::<Value>()["id"], job_id.as_str());
}

#[tokio::test]
async fn offloaded_result_is_delivered_and_released() {
    let app = build_test_app(64);
    let job = create_job(&app, "c2").await;
    let job_id = job["id"].as_str().unwrap().to_string();
    let result = json!({ "chunks": (0..200).collect::<Vec<_>>() });

    app.server
        .post(&format!("/api/v1/jobs/{job_id}/complete"))
        .json(&json!({ "result": result }))
        .await
        .assert_status_ok();

    let delivery = app.server.post("/api/v1/conversations/c2/delivery").await;
    delivery.assert_status_ok();
    let delivery: Value = delivery.json();
    assert_eq!(delivery["released"], true);
    assert_eq!(delivery["progress"]["result"], result);

    app.server
        .get("/api/v1/conversations/c2/progress")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.server
        .get(&format!("/api/v1/jobs/{job_id}"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn job_creation_is_rate_limited_per_client() {
    let app = build_test_app(usize::MAX);
    for n in 0..5 {
        app.server
            .post("/api/v1/jobs")
            .add_header("x-client-id", "client-a")
            .json(&json!({ "conversation_id": format!("conv-{n}") }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let limited = app
        .server
        .post("/api/v1/jobs")
        .add_header("x-client-id", "client-a")
        .json(&json!({ "conversation_id": "conv-5" }))
        .await;
    limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: Value = limited.json();
    assert_eq!(body["error"]["status"], 429);

    // Another client has its own window.
    app.server
        .post("/api/v1/jobs")
        .add_header("x-client-id", "client-b")
        .json(&json!({ "conversation_id": "conv-5" }))
        .await
        .assert_status(StatusCode::CREATED);

    app.clock.advance(Duration::from_secs(61));
    app.server
        .post("/api/v1/jobs")
        .add_header("x-client-id", "client-a")
        .json(&json!({ "conversation_id": "conv-6" }))
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn admission_endpoint_uses_request_limits() {
    let app = build_test_app(usize::MAX);
    let admit = |app: &common::TestApp| {
        app.server
            .post("/api/v1/rate-limit/admit")
            .json(&json!({ "key": "ip:1", "max": 2, "window_ms": 1000 }))
    };

    assert_eq!(admit(&app).await.json::<Value>()["allowed"], true);
    assert_eq!(admit(&app).await.json::<Value>()["allowed"], true);
    let third: Value = admit(&app).await.json();
    assert_eq!(third["allowed"], false);
    assert_eq!(third["max"], 2);
    assert_eq!(third["window_ms"], 1000);
}

#[tokio::test]
async fn counters_never_move_backwards() {
    let app = build_test_app(usize::MAX);
    let incremented: Value = app
        .server
        .post("/api/v1/counters/results_delivered/increment")
        .json(&json!({ "by": 7 }))
        .await
        .json();
    assert_eq!(incremented["value"], 7);

    let lowered: Value = app
        .server
        .put("/api/v1/counters/results_delivered")
        .json(&json!({ "value": 3 }))
        .await
        .json();
    assert_eq!(lowered["value"], 7);

    let slots: Value = app
        .server
        .get("/api/v1/counters/results_delivered/slots")
        .await
        .json();
    assert_eq!(slots["main_value"], 7);

    let unknown = app.server.get("/api/v1/counters/bogus").await;
    unknown.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn results_offload_and_resolve() {
    let app = build_test_app(32);
    let payload = json!({ "text": "a long enough payload to leave the store" });

    let offloaded: Value = app
        .server
        .post("/api/v1/results")
        .json(&json!({ "conversation_id": "c3", "payload": payload }))
        .await
        .json();
    assert_eq!(offloaded["kind"], "offloaded");

    let resolved = app
        .server
        .post("/api/v1/results/resolve")
        .json(&offloaded["blob_ref"])
        .await;
    resolved.assert_status_ok();
    assert_eq!(resolved.json::<Value>()["payload"], payload);

    let missing = app
        .server
        .post("/api/v1/results/resolve")
        .json(&json!({
            "url": "cacache://results/c3/missing.json",
            "size_bytes": 10,
            "created_at": "2026-01-01T00:00:00Z"
        }))
        .await;
    missing.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_and_analysis_cache() {
    let app = build_test_app(usize::MAX);
    app.server
        .post("/api/v1/metrics/completions")
        .json(&json!({ "duration_ms": 2000 }))
        .await
        .assert_status_ok();
    app.server
        .put("/api/v1/analysis/a1")
        .json(&json!({ "topics": ["rust"] }))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.server.get("/api/v1/analysis/a1").await.assert_status_ok();
    app.server
        .get("/api/v1/analysis/a2")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let metrics: Value = app.server.get("/api/v1/metrics").await.json();
    assert_eq!(metrics["completions"]["total_count"], 1);
    assert_eq!(metrics["cache"]["hits"], 1);
    assert_eq!(metrics["cache"]["misses"], 1);
    assert_eq!(metrics["counters"]["jobs_created"], 0);
}

#[tokio::test]
async fn progress_stream_ends_with_terminal_record() {
    let app = build_test_app(usize::MAX);
    let job = create_job(&app, "c4").await;
    let job_id = job["id"].as_str().unwrap().to_string();
    app.server
        .post(&format!("/api/v1/jobs/{job_id}/fail"))
        .json(&json!({ "error": "parser crashed" }))
        .await
        .assert_status_ok();

    let stream = app
        .server
        .get("/api/v1/conversations/c4/progress/stream")
        .add_query_param("poll_ms", 10)
        .await;
    stream.assert_status_ok();
    let body = stream.text();
    assert!(body.contains("event: done"));
    assert!(body.contains("parser crashed"));
}

#[tokio::test]
async fn progress_stream_ignores_requests_to_poll_faster() {
    let app = build_test_app(usize::MAX);
    create_job(&app, "c5").await;

    let stream = app
        .server
        .get("/api/v1/conversations/c5/progress/stream")
        .add_query_param("poll_ms", 0)
        .add_query_param("timeout_ms", 300)
        .await;
    stream.assert_status_ok();
    let body = stream.text();
    assert_eq!(body.matches("event: progress").count(), 1);
    assert!(!body.contains("event: done"));
}

#[tokio::test]
async fn health_reports_local_mode_and_errors_are_json() {
    let app = build_test_app(usize::MAX);
    let health: Value = app.server.get("/healthz").await.json();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["backend"], "local");
    assert_eq!(health["redis"], "not_configured");

    let invalid = app
        .server
        .post("/api/v1/jobs")
        .json(&json!({ "conversation_id": "   " }))
        .await;
    invalid.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = invalid.json();
    assert_eq!(body["error"]["status"], 400);
    assert!(body["error"]["message"].is_string());
}
