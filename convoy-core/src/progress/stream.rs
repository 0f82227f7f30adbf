use std::{sync::Arc, time::Duration};

use convoy_model::{ConversationId, ProgressRecord};
use futures::Stream;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::Instant,
};
use tracing::{debug, info, warn};

use super::ProgressTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Upper bound between two reads when no local notification arrives.
    /// Reports written by other workers are only seen through polling.
    pub poll_interval: Duration,
    /// The stream ends after this long even if the run never finishes.
    pub timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(15 * 60),
        }
    }
}

impl StreamSettings {
    /// Apply values requested by a client: polling may be slowed down but
    /// not sped up, and the timeout may be shortened but not extended.
    pub fn narrowed(self, poll_interval: Option<Duration>, timeout: Option<Duration>) -> Self {
        Self {
            poll_interval: poll_interval
                .map_or(self.poll_interval, |poll| poll.max(self.poll_interval)),
            timeout: timeout.map_or(self.timeout, |timeout| timeout.min(self.timeout)),
        }
    }
}

/// Resolve once `conversation_id` is announced, or on lag. Never resolves
/// once the channel is closed.
async fn changed(rx: &mut broadcast::Receiver<ConversationId>, conversation_id: &ConversationId) {
    loop {
        match rx.recv().await {
            Ok(id) if &id == conversation_id => return,
            Ok(_) => continue,
            Err(RecvError::Lagged(_)) => return,
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

impl ProgressTracker {
    /// Stream every distinct state of the conversation's progress record.
    ///
    /// Ends after yielding a terminal record whose result, if any, could be
    /// resolved, or once `settings.timeout` elapses.
    pub fn watch(
        self: &Arc<Self>,
        conversation_id: ConversationId,
        settings: StreamSettings,
    ) -> impl Stream<Item = ProgressRecord> + Send + use<> {
        let tracker = Arc::clone(self);
        async_stream::stream! {
            let mut notifications = tracker.subscribe();
            let deadline = Instant::now() + settings.timeout;
            let mut last_seen: Option<(u64, bool)> = None;

            loop {
                match tracker.read(&conversation_id).await {
                    Ok(Some(record)) => {
                        let marker = (record.version, record.result.is_some());
                        if last_seen != Some(marker) {
                            last_seen = Some(marker);
                            let finished = record.is_terminal() && record.blob_ref.is_none();
                            yield record;
                            if finished {
                                debug!(%conversation_id, "Progress stream finished");
                                break;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(%conversation_id, error = %err, "Progress stream read failed");
                    }
                }

                let now = Instant::now();
                if now >= deadline {
                    info!(%conversation_id, "Progress stream timed out");
                    break;
                }
                let wake_at = (now + settings.poll_interval).min(deadline);
                tokio::select! {
                    _ = tokio::time::sleep_until(wake_at) => {}
                    _ = changed(&mut notifications, &conversation_id) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        offload::{MemoryBlobStore, OffloadPolicy, ResultOffload},
        progress::DEFAULT_PROGRESS_TTL,
        store::LocalStore,
        time::{SystemTimeProvider, TimeProvider},
    };
    use convoy_model::{ProgressPatch, ProgressStatus};
    use futures::StreamExt;
    use serde_json::json;

    fn tracker() -> Arc<ProgressTracker> {
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let store = Arc::new(LocalStore::new(clock.clone()));
        let blobs = Arc::new(MemoryBlobStore::new(clock.clone()));
        let offload = Arc::new(ResultOffload::new(blobs, clock.clone(), OffloadPolicy::default()));
        Arc::new(ProgressTracker::new(store, clock, offload, DEFAULT_PROGRESS_TTL))
    }

    #[tokio::test]
    async fn stream_follows_reports_until_terminal() {
        let tracker = tracker();
        let cid = ConversationId::parse("c1").unwrap();
        tracker
            .report(&cid, ProgressPatch::stage(ProgressStatus::Parsing, 10))
            .await
            .unwrap();

        let settings = StreamSettings {
            poll_interval: Duration::from_millis(20),
            timeout: Duration::from_secs(5),
        };
        let mut stream = Box::pin(tracker.watch(cid.clone(), settings));

        let first = stream.next().await.unwrap();
        assert_eq!(first.status, ProgressStatus::Parsing);

        tracker
            .report(
                &cid,
                ProgressPatch::stage(ProgressStatus::Completed, 100).with_result(json!("R")),
            )
            .await
            .unwrap();

        let last = stream.next().await.unwrap();
        assert_eq!(last.status, ProgressStatus::Completed);
        assert_eq!(last.result, Some(json!("R")));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn client_requests_cannot_outpace_the_configured_poll_or_timeout() {
        let limits = StreamSettings::default();

        let fast = limits.narrowed(Some(Duration::ZERO), Some(Duration::from_secs(3600)));
        assert_eq!(fast, limits);

        let relaxed = limits.narrowed(Some(Duration::from_secs(5)), Some(Duration::from_secs(30)));
        assert_eq!(relaxed.poll_interval, Duration::from_secs(5));
        assert_eq!(relaxed.timeout, Duration::from_secs(30));

        assert_eq!(limits.narrowed(None, None), limits);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ends_at_timeout() {
        let tracker = tracker();
        let cid = ConversationId::parse("idle").unwrap();
        let settings = StreamSettings {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3),
        };

        let records: Vec<_> = tracker.watch(cid, settings).collect().await;
        assert!(records.is_empty());
    }
}
