use convoy_model::{ConversationId, CounterKind, JobId};

/// Key layout shared by every worker. Changing a key here orphans data
/// written by workers running the previous layout.
#[derive(Debug, Clone, Copy)]
pub struct StoreKeys;

impl StoreKeys {
    pub fn job(id: &JobId) -> String {
        format!("job:{id}")
    }

    pub fn job_by_conversation(conversation_id: &ConversationId) -> String {
        format!("job:conversation:{conversation_id}")
    }

    pub fn progress(conversation_id: &ConversationId) -> String {
        format!("progress:{conversation_id}")
    }

    pub fn rate_limit(key: &str) -> String {
        format!("ratelimit:{key}")
    }

    pub fn counter(kind: CounterKind) -> String {
        format!("counter:{kind}")
    }

    /// Backup slots are numbered from 1.
    pub fn counter_backup(kind: CounterKind, slot: usize) -> String {
        format!("counter:{kind}:backup:{slot}")
    }

    /// Main slot followed by every backup slot, in read order.
    pub fn counter_slots(kind: CounterKind) -> Vec<String> {
        std::iter::once(Self::counter(kind))
            .chain(
                (1..=convoy_model::BACKUP_SLOTS)
                    .map(|slot| Self::counter_backup(kind, slot)),
            )
            .collect()
    }

    pub fn analysis(analysis_id: &str) -> String {
        format!("analysis:{analysis_id}")
    }

    pub fn completions() -> String {
        "metrics:completions".to_string()
    }

    pub fn cache_hits() -> String {
        "metrics:cache:hits".to_string()
    }

    pub fn cache_misses() -> String {
        "metrics:cache:misses".to_string()
    }
}
