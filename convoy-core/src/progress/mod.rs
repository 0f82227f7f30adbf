//! Conversation-keyed progress records.
//!
//! Reports merge onto the stored record and are checked against the stage
//! machine in [`ProgressStatus::allows`]; stale or out-of-order reports are
//! dropped. Results go through [`ResultOffload`] before they are attached.

use std::{sync::Arc, time::Duration};

use convoy_model::{ConversationId, ProgressPatch, ProgressRecord, ProgressStatus};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    error::Result,
    keys::StoreKeys,
    offload::{OffloadOutcome, ResultOffload},
    store::{
        Mutation, Store, UpdateOutcome,
        versioned::{read_record, update_record},
    },
    time::TimeProvider,
};

mod stream;

pub use stream::StreamSettings;

pub const DEFAULT_PROGRESS_TTL: Duration = Duration::from_secs(60 * 60);

const NOTIFY_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Applied(ProgressRecord),
    /// The report would move the record backwards or out of a terminal
    /// stage and was dropped.
    Ignored {
        current: ProgressStatus,
        requested: Option<ProgressStatus>,
    },
}

impl ReportOutcome {
    pub fn record(&self) -> Option<&ProgressRecord> {
        match self {
            ReportOutcome::Applied(record) => Some(record),
            ReportOutcome::Ignored { .. } => None,
        }
    }
}

pub struct ProgressTracker {
    store: Arc<dyn Store>,
    clock: Arc<dyn TimeProvider>,
    offload: Arc<ResultOffload>,
    ttl: Duration,
    notify: broadcast::Sender<ConversationId>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("ttl", &self.ttl)
            .field("subscribers", &self.notify.receiver_count())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn TimeProvider>,
        offload: Arc<ResultOffload>,
        ttl: Duration,
    ) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            store,
            clock,
            offload,
            ttl,
            notify,
        }
    }

    /// Start a fresh run, replacing whatever record the conversation had.
    pub async fn begin(&self, conversation_id: &ConversationId) -> Result<ProgressRecord> {
        let now = self.clock.utc_now();
        let ttl = self.ttl;
        let outcome = update_record::<ProgressRecord, _>(
            self.store.as_ref(),
            &StoreKeys::progress(conversation_id),
            |_| Mutation::Write {
                record: ProgressRecord::new(conversation_id.clone(), now),
                ttl: Some(ttl),
            },
        )
        .await?;

        match outcome {
            UpdateOutcome::Written(record) | UpdateOutcome::Skipped(Some(record)) => {
                self.announce(conversation_id);
                Ok(record)
            }
            UpdateOutcome::Skipped(None) => Ok(ProgressRecord::new(conversation_id.clone(), now)),
        }
    }

    /// Merge `patch` onto the conversation's record, offloading any result.
    pub async fn report(
        &self,
        conversation_id: &ConversationId,
        mut patch: ProgressPatch,
    ) -> Result<ReportOutcome> {
        let result = match patch.result.take() {
            Some(payload) => Some(self.offload.maybe_offload(conversation_id, payload).await),
            None => None,
        };
        self.report_resolved(conversation_id, &patch, result).await
    }

    /// Like [`ProgressTracker::report`] with the offload decision already
    /// made. `patch.result` is ignored.
    pub async fn report_resolved(
        &self,
        conversation_id: &ConversationId,
        patch: &ProgressPatch,
        result: Option<OffloadOutcome>,
    ) -> Result<ReportOutcome> {
        let now = self.clock.utc_now();
        let ttl = self.ttl;
        let mut rejected = None;

        let written = update_record::<ProgressRecord, _>(
            self.store.as_ref(),
            &StoreKeys::progress(conversation_id),
            |current| {
                let mut record =
                    current.unwrap_or_else(|| ProgressRecord::new(conversation_id.clone(), now));

                let accepted = match patch.status {
                    Some(next) => record.status.allows(next),
                    None => !record.is_terminal(),
                };
                if !accepted {
                    rejected = Some(record.status);
                    return Mutation::Skip(Some(record));
                }
                if patch.status == Some(ProgressStatus::Starting) && record.is_terminal() {
                    record = ProgressRecord::new(conversation_id.clone(), now);
                }

                record.apply(patch, now);
                match &result {
                    Some(OffloadOutcome::Inline(payload)) => record.attach_inline(payload.clone()),
                    Some(OffloadOutcome::Offloaded(reference)) => {
                        record.attach_blob(reference.clone())
                    }
                    None => {}
                }

                let ttl = if record.is_terminal() && record.has_result() {
                    ttl.saturating_mul(2)
                } else {
                    ttl
                };
                Mutation::Write {
                    record,
                    ttl: Some(ttl),
                }
            },
        )
        .await;
        let outcome = match written {
            Ok(outcome) => outcome,
            Err(err) => {
                self.discard_unattached(result.as_ref()).await;
                return Err(err);
            }
        };

        match outcome {
            UpdateOutcome::Written(record) => {
                debug!(
                    %conversation_id,
                    status = record.status.as_str(),
                    progress = record.progress,
                    "Progress reported"
                );
                if record.is_terminal() {
                    info!(%conversation_id, status = record.status.as_str(), "Progress reached terminal stage");
                }
                self.announce(conversation_id);
                Ok(ReportOutcome::Applied(record))
            }
            UpdateOutcome::Skipped(_) => {
                self.discard_unattached(result.as_ref()).await;
                let current = rejected.unwrap_or(ProgressStatus::Starting);
                info!(
                    %conversation_id,
                    current = current.as_str(),
                    requested = patch.status.map(ProgressStatus::as_str),
                    "Dropped out-of-order progress report"
                );
                Ok(ReportOutcome::Ignored {
                    current,
                    requested: patch.status,
                })
            }
        }
    }

    /// Current record with any offloaded result resolved. When the blob
    /// cannot be fetched the reference stays and `result` is empty.
    pub async fn read(&self, conversation_id: &ConversationId) -> Result<Option<ProgressRecord>> {
        let Some(mut record) = read_record::<ProgressRecord>(
            self.store.as_ref(),
            &StoreKeys::progress(conversation_id),
        )
        .await?
        .into_option() else {
            return Ok(None);
        };

        if record.result.is_none()
            && let Some(reference) = record.blob_ref.clone()
            && let Some(payload) = self.offload.resolve(&reference).await
        {
            record.attach_inline(payload);
        }
        Ok(Some(record))
    }

    pub async fn delete(&self, conversation_id: &ConversationId) -> Result<bool> {
        let removed = self
            .store
            .delete(&[StoreKeys::progress(conversation_id)])
            .await?;
        Ok(removed > 0)
    }

    /// Conversation ids whose record changed in this process.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationId> {
        self.notify.subscribe()
    }

    /// A blob written for a report that was not stored would only be
    /// reclaimed by the budget pass.
    async fn discard_unattached(&self, result: Option<&OffloadOutcome>) {
        if let Some(OffloadOutcome::Offloaded(reference)) = result {
            self.offload.discard(reference).await;
        }
    }

    fn announce(&self, conversation_id: &ConversationId) {
        // No subscribers is the common case.
        let _ = self.notify.send(conversation_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        offload::{BlobStore, MemoryBlobStore, OffloadPolicy},
        store::LocalStore,
        time::VirtualTimeProvider,
    };
    use serde_json::json;

    struct Fixture {
        tracker: ProgressTracker,
        clock: VirtualTimeProvider,
        blobs: Arc<MemoryBlobStore>,
    }

    fn fixture(threshold: usize) -> Fixture {
        let clock = VirtualTimeProvider::default();
        let time: Arc<dyn TimeProvider> = Arc::new(clock.clone());
        let store = Arc::new(LocalStore::new(time.clone()));
        let blobs = Arc::new(MemoryBlobStore::new(time.clone()));
        let offload = Arc::new(ResultOffload::new(
            blobs.clone(),
            time.clone(),
            OffloadPolicy {
                inline_threshold_bytes: threshold,
                ..OffloadPolicy::default()
            },
        ));
        Fixture {
            tracker: ProgressTracker::new(store, time, offload, DEFAULT_PROGRESS_TTL),
            clock,
            blobs,
        }
    }

    fn cid() -> ConversationId {
        ConversationId::parse("c1").unwrap()
    }

    #[tokio::test]
    async fn partial_reports_merge() {
        let fx = fixture(usize::MAX);
        fx.tracker
            .report(&cid(), ProgressPatch::stage(ProgressStatus::Chunking, 40).with_chunks(1, 4))
            .await
            .unwrap();
        fx.tracker
            .report(&cid(), ProgressPatch::default().with_message("chunk 2"))
            .await
            .unwrap();

        let record = fx.tracker.read(&cid()).await.unwrap().unwrap();
        assert_eq!(record.status, ProgressStatus::Chunking);
        assert_eq!(record.progress, 40);
        assert_eq!(record.total_chunks, Some(4));
        assert_eq!(record.message.as_deref(), Some("chunk 2"));
    }

    #[tokio::test]
    async fn progress_is_clamped() {
        let fx = fixture(usize::MAX);
        for raw in [-40, 180] {
            fx.tracker
                .report(&cid(), ProgressPatch::stage(ProgressStatus::Parsing, raw))
                .await
                .unwrap();
            let record = fx.tracker.read(&cid()).await.unwrap().unwrap();
            assert!(record.progress <= 100);
        }
        let record = fx.tracker.read(&cid()).await.unwrap().unwrap();
        assert_eq!(record.progress, 100);
    }

    #[tokio::test]
    async fn backwards_and_post_terminal_reports_are_dropped() {
        let fx = fixture(usize::MAX);
        fx.tracker
            .report(&cid(), ProgressPatch::stage(ProgressStatus::Analyzing, 70))
            .await
            .unwrap();
        let outcome = fx
            .tracker
            .report(&cid(), ProgressPatch::stage(ProgressStatus::Parsing, 10))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReportOutcome::Ignored {
                current: ProgressStatus::Analyzing,
                requested: Some(ProgressStatus::Parsing),
            }
        );

        fx.tracker
            .report(&cid(), ProgressPatch::stage(ProgressStatus::Error, 70).with_error("boom"))
            .await
            .unwrap();
        let late = fx
            .tracker
            .report(&cid(), ProgressPatch::default().with_message("late"))
            .await
            .unwrap();
        assert!(late.record().is_none());

        let record = fx.tracker.read(&cid()).await.unwrap().unwrap();
        assert_eq!(record.status, ProgressStatus::Error);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.message.is_none());
    }

    #[tokio::test]
    async fn starting_replaces_terminal_record() {
        let fx = fixture(usize::MAX);
        fx.tracker
            .report(
                &cid(),
                ProgressPatch::stage(ProgressStatus::Completed, 100).with_result(json!("R")),
            )
            .await
            .unwrap();
        fx.tracker
            .report(&cid(), ProgressPatch::stage(ProgressStatus::Starting, 0))
            .await
            .unwrap();

        let record = fx.tracker.read(&cid()).await.unwrap().unwrap();
        assert_eq!(record.status, ProgressStatus::Starting);
        assert!(record.result.is_none());
    }

    #[tokio::test]
    async fn large_result_is_offloaded_and_read_back() {
        let fx = fixture(64);
        let payload = json!({"summary": "s".repeat(200)});
        let outcome = fx
            .tracker
            .report(
                &cid(),
                ProgressPatch::stage(ProgressStatus::Completed, 100).with_result(payload.clone()),
            )
            .await
            .unwrap();

        let stored = outcome.record().unwrap();
        assert!(stored.result.is_none());
        assert!(stored.blob_ref.is_some());
        assert_eq!(fx.blobs.len(), 1);

        let record = fx.tracker.read(&cid()).await.unwrap().unwrap();
        assert_eq!(record.result, Some(payload));
        assert!(record.blob_ref.is_none());
    }

    #[tokio::test]
    async fn missing_blob_leaves_reference_in_place() {
        let fx = fixture(8);
        let outcome = fx
            .tracker
            .report(
                &cid(),
                ProgressPatch::stage(ProgressStatus::Completed, 100)
                    .with_result(json!(["a long enough result"])),
            )
            .await
            .unwrap();
        let reference = outcome.record().and_then(|r| r.blob_ref.clone()).unwrap();
        fx.blobs.delete(&reference.url).await.unwrap();

        let record = fx.tracker.read(&cid()).await.unwrap().unwrap();
        assert!(record.result.is_none());
        assert_eq!(record.blob_ref, Some(reference));
    }

    #[tokio::test]
    async fn dropped_report_does_not_leave_its_blob_behind() {
        let fx = fixture(8);
        fx.tracker
            .report(&cid(), ProgressPatch::stage(ProgressStatus::Error, 50).with_error("boom"))
            .await
            .unwrap();

        let outcome = fx
            .tracker
            .report(
                &cid(),
                ProgressPatch::stage(ProgressStatus::Completed, 100)
                    .with_result(json!(["a result too large to inline"])),
            )
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ReportOutcome::Ignored {
                current: ProgressStatus::Error,
                ..
            }
        ));
        assert!(fx.blobs.is_empty());
    }

    #[tokio::test]
    async fn terminal_result_doubles_ttl() {
        let fx = fixture(usize::MAX);
        fx.tracker
            .report(
                &cid(),
                ProgressPatch::stage(ProgressStatus::Completed, 100).with_result(json!(1)),
            )
            .await
            .unwrap();

        fx.clock.advance(DEFAULT_PROGRESS_TTL + Duration::from_secs(60));
        assert!(fx.tracker.read(&cid()).await.unwrap().is_some());

        fx.clock.advance(DEFAULT_PROGRESS_TTL);
        assert!(fx.tracker.read(&cid()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reports_notify_subscribers() {
        let fx = fixture(usize::MAX);
        let mut rx = fx.tracker.subscribe();
        fx.tracker
            .report(&cid(), ProgressPatch::stage(ProgressStatus::Parsing, 5))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), cid());
    }
}
