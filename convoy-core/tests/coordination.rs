mod support;

use std::{sync::Arc, time::Duration};

use convoy_core::{
    CacheBlobStore, Coordinator, CoordinatorSettings, LocalStore, OffloadOutcome,
    OffloadPolicy, ReportOutcome, Store, TimeProvider, VirtualTimeProvider,
    model::{
        ConversationId, CounterKind, JobPatch, JobStatus, ProgressPatch, ProgressStatus,
    },
};
use serde_json::json;
use support::{harness, harness_with_threshold, temp_cache_dir};

fn cid(raw: &str) -> ConversationId {
    ConversationId::parse(raw).expect("valid conversation id")
}

/// Walk one run through every stage and complete it with `result`.
async fn run_pipeline(coordinator: &Coordinator, conversation: &ConversationId, result: serde_json::Value) {
    let job = coordinator.create_job(conversation).await.expect("create job");
    coordinator
        .update_job(&job.id, &JobPatch::status(JobStatus::Running))
        .await
        .expect("start job");

    for (stage, progress) in [
        (ProgressStatus::Parsing, 10),
        (ProgressStatus::Media, 25),
        (ProgressStatus::Chunking, 40),
        (ProgressStatus::Analyzing, 70),
        (ProgressStatus::Finalizing, 95),
    ] {
        let outcome = coordinator
            .report_progress(conversation, ProgressPatch::stage(stage, progress))
            .await
            .expect("report progress");
        assert!(matches!(outcome, ReportOutcome::Applied(_)));
    }

    coordinator
        .complete_job(&job.id, result, Some(Duration::from_secs(42)))
        .await
        .expect("complete job");
}

#[tokio::test]
async fn c1_scenario_with_inline_result() {
    let h = harness();
    let conversation = cid("c1");
    let result = json!({"summary": "R"});

    run_pipeline(&h.coordinator, &conversation, result.clone()).await;

    let progress = h
        .coordinator
        .read_progress(&conversation)
        .await
        .expect("read progress")
        .expect("progress exists");
    assert_eq!(progress.status, ProgressStatus::Completed);
    assert_eq!(progress.progress, 100);
    assert_eq!(progress.result, Some(result.clone()));

    let job = h
        .coordinator
        .get_job_by_conversation(&conversation)
        .await
        .expect("read job")
        .expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(result));
    assert!(h.blobs.is_empty());
}

#[tokio::test]
async fn c1_scenario_with_offloaded_result() {
    let h = harness_with_threshold(128);
    let conversation = cid("c1");
    let result = json!({"summary": "R".repeat(4096)});

    run_pipeline(&h.coordinator, &conversation, result.clone()).await;

    assert_eq!(h.blobs.len(), 1);
    let progress = h
        .coordinator
        .read_progress(&conversation)
        .await
        .expect("read progress")
        .expect("progress exists");
    assert_eq!(progress.status, ProgressStatus::Completed);
    assert_eq!(progress.progress, 100);
    assert_eq!(progress.result, Some(result));

    // The job record does not duplicate the oversized payload.
    let job = h
        .coordinator
        .get_job_by_conversation(&conversation)
        .await
        .expect("read job")
        .expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.result.is_none());
}

#[tokio::test]
async fn c1_scenario_with_on_disk_blobs() {
    let dir = temp_cache_dir();
    let clock = VirtualTimeProvider::default();
    let time: Arc<dyn TimeProvider> = Arc::new(clock);
    let coordinator = Coordinator::new(
        Arc::new(LocalStore::new(time.clone())),
        Arc::new(CacheBlobStore::new(dir.path(), time.clone())),
        time,
        CoordinatorSettings {
            offload: OffloadPolicy {
                inline_threshold_bytes: 64,
                ..OffloadPolicy::default()
            },
            ..CoordinatorSettings::default()
        },
    );
    let conversation = cid("c1");
    let result = json!({"chunks": (0..100).collect::<Vec<_>>()});

    run_pipeline(&coordinator, &conversation, result.clone()).await;

    let progress = coordinator
        .read_progress(&conversation)
        .await
        .expect("read progress")
        .expect("progress exists");
    assert_eq!(progress.result, Some(result));
}

#[tokio::test]
async fn delivery_releases_finished_runs_only() {
    let h = harness();
    let conversation = cid("c2");
    let job = h.coordinator.create_job(&conversation).await.expect("create job");

    let pending = h
        .coordinator
        .deliver(&conversation)
        .await
        .expect("deliver")
        .expect("delivery");
    assert!(!pending.released);
    assert_eq!(pending.progress.status, ProgressStatus::Starting);

    h.coordinator
        .complete_job(&job.id, json!("done"), None)
        .await
        .expect("complete");
    let delivered = h
        .coordinator
        .deliver(&conversation)
        .await
        .expect("deliver")
        .expect("delivery");
    assert!(delivered.released);
    assert_eq!(delivered.progress.result, Some(json!("done")));
    assert_eq!(delivered.job.map(|job| job.id), Some(job.id.clone()));

    assert!(h.coordinator.read_progress(&conversation).await.unwrap().is_none());
    assert!(h.coordinator.get_job(&job.id).await.unwrap().is_none());
    assert!(h.coordinator.deliver(&conversation).await.unwrap().is_none());
    assert_eq!(
        h.coordinator
            .get_counter(CounterKind::ResultsDelivered)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn failed_job_marks_progress_error() {
    let h = harness();
    let conversation = cid("c3");
    let job = h.coordinator.create_job(&conversation).await.expect("create job");
    h.coordinator
        .report_progress(&conversation, ProgressPatch::stage(ProgressStatus::Media, 30))
        .await
        .expect("report");

    h.coordinator
        .fail_job(&job.id, "transcoder crashed")
        .await
        .expect("fail job");

    let progress = h.coordinator.read_progress(&conversation).await.unwrap().unwrap();
    assert_eq!(progress.status, ProgressStatus::Error);
    assert_eq!(progress.error.as_deref(), Some("transcoder crashed"));
    let stored = h.coordinator.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(
        h.coordinator.get_counter(CounterKind::JobsFailed).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn completion_updates_counters_and_metrics_once() {
    let h = harness();
    let conversation = cid("c4");
    let job = h.coordinator.create_job(&conversation).await.expect("create job");

    h.coordinator
        .complete_job(&job.id, json!(1), Some(Duration::from_millis(800)))
        .await
        .expect("complete");
    // Completing twice is a no-op.
    h.coordinator
        .complete_job(&job.id, json!(2), Some(Duration::from_millis(800)))
        .await
        .expect("complete again");

    assert_eq!(
        h.coordinator.get_counter(CounterKind::JobsCreated).await.unwrap(),
        1
    );
    assert_eq!(
        h.coordinator.get_counter(CounterKind::JobsCompleted).await.unwrap(),
        1
    );
    let aggregate = h.coordinator.aggregate().await.unwrap();
    assert_eq!(aggregate.total_count, 1);
    assert!((aggregate.average_duration_ms - 800.0).abs() < 1e-6);
}

#[tokio::test]
async fn completion_after_progress_error_is_not_counted() {
    let h = harness_with_threshold(64);
    let conversation = cid("c9");
    let job = h.coordinator.create_job(&conversation).await.expect("create job");
    h.coordinator
        .report_progress(
            &conversation,
            ProgressPatch::stage(ProgressStatus::Error, 30).with_error("worker crashed"),
        )
        .await
        .expect("report error");

    h.coordinator
        .complete_job(&job.id, json!({"summary": "R".repeat(512)}), Some(Duration::from_secs(3)))
        .await
        .expect("complete job");

    let progress = h
        .coordinator
        .read_progress(&conversation)
        .await
        .expect("read progress")
        .expect("progress exists");
    assert_eq!(progress.status, ProgressStatus::Error);
    assert!(progress.result.is_none());
    assert!(progress.blob_ref.is_none());
    assert!(h.blobs.is_empty());
    assert_eq!(
        h.coordinator.get_counter(CounterKind::JobsCompleted).await.unwrap(),
        0
    );
    assert_eq!(h.coordinator.aggregate().await.unwrap().total_count, 0);
}

#[tokio::test]
async fn new_job_resets_abandoned_progress() {
    let h = harness();
    let conversation = cid("c5");
    h.coordinator.create_job(&conversation).await.expect("create job");
    h.coordinator
        .report_progress(&conversation, ProgressPatch::stage(ProgressStatus::Analyzing, 60))
        .await
        .expect("report");

    h.coordinator.create_job(&conversation).await.expect("second job");

    let progress = h.coordinator.read_progress(&conversation).await.unwrap().unwrap();
    assert_eq!(progress.status, ProgressStatus::Starting);
    assert_eq!(progress.progress, 0);
}

#[tokio::test]
async fn rate_limit_window_with_virtual_time() {
    let h = harness();
    let window = Duration::from_secs(60);

    for _ in 0..5 {
        assert!(h.coordinator.admit_request("ip:1", 5, window).await.unwrap());
    }
    assert!(!h.coordinator.admit_request("ip:1", 5, window).await.unwrap());

    h.clock.advance(Duration::from_millis(60_001));
    assert!(h.coordinator.admit_request("ip:1", 5, window).await.unwrap());

    let decision = h.coordinator.admit_default("ip:2").await.unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn offload_threshold_boundary() {
    let payload = json!({"summary": "abcdefgh"});
    let size = serde_json::to_vec(&payload).unwrap().len();

    let below = harness_with_threshold(size + 1);
    let outcome = below
        .coordinator
        .offload_result(&cid("c6"), payload.clone())
        .await;
    assert_eq!(outcome, OffloadOutcome::Inline(payload.clone()));

    let at = harness_with_threshold(size);
    let OffloadOutcome::Offloaded(reference) =
        at.coordinator.offload_result(&cid("c6"), payload.clone()).await
    else {
        panic!("payload at threshold must be offloaded");
    };
    assert_eq!(at.coordinator.resolve_result(&reference).await, Some(payload));
}

#[tokio::test]
async fn counters_self_heal_after_main_slot_loss() {
    let h = harness();
    for _ in 0..3 {
        h.coordinator
            .increment_counter(CounterKind::JobsCompleted, 1)
            .await
            .unwrap();
    }
    h.store
        .delete(&["counter:jobs_completed".to_string()])
        .await
        .unwrap();

    assert_eq!(
        h.coordinator
            .get_counter(CounterKind::JobsCompleted)
            .await
            .unwrap(),
        3
    );
    let snapshot = h
        .coordinator
        .counter_snapshot(CounterKind::JobsCompleted)
        .await
        .unwrap();
    assert_eq!(snapshot.main_value, Some(3));
}
