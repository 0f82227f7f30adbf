//! Result offload.
//!
//! Results small enough to live inside a progress record are stored
//! inline. Larger ones go to a [`BlobStore`] and the record keeps a
//! [`ResultBlobReference`] instead. A periodic budget pass deletes the
//! oldest stored objects once the total size exceeds the configured budget.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use convoy_model::{ConversationId, ResultBlobReference};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{random_suffix, time::TimeProvider};

pub mod blob_store;
pub mod cache_store;
pub mod memory;

pub use blob_store::{BlobError, BlobObject, BlobStore};
pub use cache_store::CacheBlobStore;
pub use memory::MemoryBlobStore;

#[cfg(test)]
pub use blob_store::MockBlobStore;

/// Prefix every offloaded result is written under.
pub const RESULTS_PREFIX: &str = "results/";

pub const DEFAULT_INLINE_THRESHOLD_BYTES: usize = 512 * 1024;
pub const DEFAULT_BUDGET_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadPolicy {
    /// Serialized payloads of at least this many bytes are offloaded.
    pub inline_threshold_bytes: usize,
    /// Total bytes kept under `prefixes` before the oldest are deleted.
    pub budget_bytes: u64,
    pub prefixes: Vec<String>,
}

impl Default for OffloadPolicy {
    fn default() -> Self {
        Self {
            inline_threshold_bytes: DEFAULT_INLINE_THRESHOLD_BYTES,
            budget_bytes: DEFAULT_BUDGET_BYTES,
            prefixes: vec![RESULTS_PREFIX.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OffloadOutcome {
    Inline(Value),
    Offloaded(ResultBlobReference),
}

/// Summary of one budget enforcement pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetReport {
    pub scanned: usize,
    pub total_bytes: u64,
    pub budget_bytes: u64,
    pub deleted: usize,
    pub freed_bytes: u64,
}

pub struct ResultOffload {
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn TimeProvider>,
    policy: OffloadPolicy,
}

impl std::fmt::Debug for ResultOffload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultOffload")
            .field("policy", &self.policy)
            .finish()
    }
}

impl ResultOffload {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn TimeProvider>,
        policy: OffloadPolicy,
    ) -> Self {
        Self {
            blobs,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &OffloadPolicy {
        &self.policy
    }

    /// Decide where `payload` lives. Never fails: when the blob store
    /// refuses the write the payload stays inline.
    pub async fn maybe_offload(
        &self,
        conversation_id: &ConversationId,
        payload: Value,
    ) -> OffloadOutcome {
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%conversation_id, error = %err, "Result not serializable, keeping inline");
                return OffloadOutcome::Inline(payload);
            }
        };
        if bytes.len() < self.policy.inline_threshold_bytes {
            return OffloadOutcome::Inline(payload);
        }

        let name = format!(
            "{RESULTS_PREFIX}{conversation_id}/{}-{}.json",
            self.clock.unix_millis(),
            random_suffix(8)
        );
        let size = bytes.len();
        match self.blobs.put(&name, bytes).await {
            Ok(object) => {
                debug!(%conversation_id, url = %object.url, size, "Offloaded result");
                OffloadOutcome::Offloaded(ResultBlobReference {
                    url: object.url,
                    size_bytes: object.size_bytes,
                    created_at: object.created_at,
                })
            }
            Err(err) => {
                warn!(
                    %conversation_id,
                    size,
                    error = %err,
                    "Blob write failed, storing oversized result inline"
                );
                OffloadOutcome::Inline(payload)
            }
        }
    }

    /// Fetch and decode an offloaded result. `None` means "temporarily
    /// unavailable", not "does not exist".
    pub async fn resolve(&self, reference: &ResultBlobReference) -> Option<Value> {
        match self.blobs.get(&reference.url).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(url = %reference.url, error = %err, "Stored result is not valid JSON");
                    None
                }
            },
            Ok(None) => {
                debug!(url = %reference.url, "Offloaded result not found");
                None
            }
            Err(err) => {
                warn!(url = %reference.url, error = %err, "Failed to fetch offloaded result");
                None
            }
        }
    }

    /// Best-effort removal of a blob that no record ended up pointing at.
    pub async fn discard(&self, reference: &ResultBlobReference) {
        match self.blobs.delete(&reference.url).await {
            Ok(()) => debug!(url = %reference.url, "Discarded unattached result"),
            Err(err) => {
                warn!(url = %reference.url, error = %err, "Failed to discard unattached result")
            }
        }
    }

    /// Delete the oldest objects under the known prefixes until their total
    /// size is back within budget. Individual delete failures are skipped.
    ///
    /// Objects sharing stored bytes are sized once and aged by their newest
    /// member, so a payload still referenced by a recent result is not
    /// reclaimed through an older duplicate.
    pub async fn enforce_budget(&self) -> Result<BudgetReport, BlobError> {
        let mut objects = Vec::new();
        for prefix in &self.policy.prefixes {
            objects.extend(self.blobs.list(prefix).await?);
        }
        objects.sort_by(|a, b| a.url.cmp(&b.url));
        objects.dedup_by(|a, b| a.url == b.url);
        let scanned = objects.len();

        let mut groups: HashMap<String, StoredContent> = HashMap::new();
        for object in objects {
            let group = groups
                .entry(object.storage_key().to_string())
                .or_insert_with(|| StoredContent {
                    size_bytes: object.size_bytes,
                    newest: object.created_at,
                    objects: Vec::new(),
                });
            group.newest = group.newest.max(object.created_at);
            group.objects.push(object);
        }
        let mut groups: Vec<StoredContent> = groups.into_values().collect();
        groups.sort_by(|a, b| {
            a.newest
                .cmp(&b.newest)
                .then_with(|| a.objects[0].url.cmp(&b.objects[0].url))
        });

        let total_bytes: u64 = groups.iter().map(|group| group.size_bytes).sum();
        let mut report = BudgetReport {
            scanned,
            total_bytes,
            budget_bytes: self.policy.budget_bytes,
            ..BudgetReport::default()
        };
        if total_bytes <= self.policy.budget_bytes {
            debug!(total_bytes, budget = self.policy.budget_bytes, "Blob storage within budget");
            return Ok(report);
        }

        let mut remaining = total_bytes;
        for group in groups {
            if remaining <= self.policy.budget_bytes {
                break;
            }
            let mut released = true;
            for object in &group.objects {
                match self.blobs.delete(&object.url).await {
                    Ok(()) => report.deleted += 1,
                    Err(err) => {
                        released = false;
                        warn!(url = %object.url, error = %err, "Failed to delete blob during budget pass");
                    }
                }
            }
            if released {
                remaining = remaining.saturating_sub(group.size_bytes);
                report.freed_bytes += group.size_bytes;
            }
        }

        info!(
            deleted = report.deleted,
            freed_bytes = report.freed_bytes,
            remaining_bytes = remaining,
            budget = report.budget_bytes,
            "Blob budget enforced"
        );
        Ok(report)
    }
}

/// Objects backed by the same stored bytes.
struct StoredContent {
    size_bytes: u64,
    newest: DateTime<Utc>,
    objects: Vec<BlobObject>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::VirtualTimeProvider;
    use serde_json::json;
    use std::time::Duration;

    fn cid() -> ConversationId {
        ConversationId::parse("c1").unwrap()
    }

    fn offload_with(
        blobs: Arc<dyn BlobStore>,
        clock: VirtualTimeProvider,
        threshold: usize,
        budget: u64,
    ) -> ResultOffload {
        ResultOffload::new(
            blobs,
            Arc::new(clock),
            OffloadPolicy {
                inline_threshold_bytes: threshold,
                budget_bytes: budget,
                ..OffloadPolicy::default()
            },
        )
    }

    #[tokio::test]
    async fn payload_below_threshold_stays_inline() {
        let clock = VirtualTimeProvider::default();
        let blobs = Arc::new(MemoryBlobStore::new(Arc::new(clock.clone())));
        let offload = offload_with(blobs.clone(), clock, 1024, u64::MAX);

        let outcome = offload.maybe_offload(&cid(), json!({"summary": "short"})).await;

        assert_eq!(outcome, OffloadOutcome::Inline(json!({"summary": "short"})));
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn payload_at_threshold_is_offloaded_and_resolves() {
        let clock = VirtualTimeProvider::default();
        let blobs = Arc::new(MemoryBlobStore::new(Arc::new(clock.clone())));
        let payload = json!({"summary": "x".repeat(64)});
        let size = serde_json::to_vec(&payload).unwrap().len();
        let offload = offload_with(blobs, clock, size, u64::MAX);

        let OffloadOutcome::Offloaded(reference) =
            offload.maybe_offload(&cid(), payload.clone()).await
        else {
            panic!("expected offload at threshold");
        };
        assert_eq!(reference.size_bytes, size as u64);
        assert!(reference.url.starts_with("memory://results/c1/"));
        assert_eq!(offload.resolve(&reference).await, Some(payload));
    }

    #[tokio::test]
    async fn failed_blob_write_falls_back_to_inline() {
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_put()
            .returning(|_, _| Err(BlobError::Io("disk full".into())));
        let offload = offload_with(Arc::new(blobs), VirtualTimeProvider::default(), 1, u64::MAX);

        let outcome = offload.maybe_offload(&cid(), json!([1, 2, 3])).await;

        assert_eq!(outcome, OffloadOutcome::Inline(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn unreachable_blob_resolves_to_none() {
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_get()
            .returning(|_| Err(BlobError::Io("timeout".into())));
        let offload = offload_with(Arc::new(blobs), VirtualTimeProvider::default(), 1, u64::MAX);

        let reference = ResultBlobReference {
            url: "memory://results/c1/1-a.json".into(),
            size_bytes: 10,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(offload.resolve(&reference).await, None);
    }

    #[tokio::test]
    async fn budget_pass_deletes_oldest_first() {
        let clock = VirtualTimeProvider::default();
        let blobs = Arc::new(MemoryBlobStore::new(Arc::new(clock.clone())));
        for name in ["results/a/old.json", "results/b/mid.json", "results/c/new.json"] {
            blobs.put(name, vec![0u8; 100]).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }
        let offload = offload_with(blobs.clone(), clock, 1, 150);

        let report = offload.enforce_budget().await.unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.total_bytes, 300);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.freed_bytes, 200);
        let left = blobs.list(RESULTS_PREFIX).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "results/c/new.json");
    }

    #[tokio::test]
    async fn budget_pass_within_budget_deletes_nothing() {
        let clock = VirtualTimeProvider::default();
        let blobs = Arc::new(MemoryBlobStore::new(Arc::new(clock.clone())));
        blobs.put("results/a/1.json", vec![0u8; 10]).await.unwrap();
        let offload = offload_with(blobs.clone(), clock, 1, 1_000);

        let report = offload.enforce_budget().await.unwrap();

        assert_eq!(report.deleted, 0);
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn identical_results_share_storage_and_survive_budget_pass() {
        let dir = tempfile::tempdir().unwrap();
        let clock = VirtualTimeProvider::default();
        let blobs = Arc::new(CacheBlobStore::new(dir.path(), Arc::new(clock.clone())));
        let payload = json!({"summary": "y".repeat(200)});
        let size = serde_json::to_vec(&payload).unwrap().len() as u64;
        let offload = offload_with(blobs, clock, 1, size + size / 2);

        let mut references = Vec::new();
        for conversation in ["a", "b"] {
            let cid = ConversationId::parse(conversation).unwrap();
            let OffloadOutcome::Offloaded(reference) =
                offload.maybe_offload(&cid, payload.clone()).await
            else {
                panic!("expected offload");
            };
            references.push(reference);
        }

        let report = offload.enforce_budget().await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.total_bytes, size);
        assert_eq!(report.deleted, 0);
        for reference in &references {
            assert_eq!(offload.resolve(reference).await, Some(payload.clone()));
        }
    }

    #[tokio::test]
    async fn shared_content_is_aged_by_its_newest_reference() {
        let base = chrono::Utc::now();
        let object = |url: &str, key: &str, secs: i64| BlobObject {
            url: url.to_string(),
            name: url.to_string(),
            size_bytes: 100,
            created_at: base + chrono::Duration::seconds(secs),
            content_key: Some(key.to_string()),
        };
        let listed = vec![
            object("memory://results/a/1.json", "shared", 0),
            object("memory://results/b/2.json", "single", 1),
            object("memory://results/c/3.json", "shared", 2),
        ];

        let mut blobs = MockBlobStore::new();
        blobs.expect_list().returning(move |_| Ok(listed.clone()));
        blobs
            .expect_delete()
            .withf(|url| url.ends_with("b/2.json"))
            .times(1)
            .returning(|_| Ok(()));
        let offload = offload_with(Arc::new(blobs), VirtualTimeProvider::default(), 1, 150);

        let report = offload.enforce_budget().await.unwrap();

        assert_eq!(report.total_bytes, 200);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.freed_bytes, 100);
    }
}
