use std::{sync::Arc, time::Duration};

use convoy_model::{ConversationId, Job, JobId, JobPatch, JobStatus};
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    keys::StoreKeys,
    random_suffix,
    store::{
        Mutation, Store, StoreEntry, UpdateOutcome,
        versioned::{read_record, update_record},
    },
    time::TimeProvider,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTtls {
    pub active: Duration,
    /// Applied once a job reaches a terminal state so pollers have longer
    /// to collect the result.
    pub terminal: Duration,
}

impl Default for JobTtls {
    fn default() -> Self {
        Self {
            active: Duration::from_secs(60 * 60),
            terminal: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl JobTtls {
    fn for_job(&self, job: &Job) -> Duration {
        if job.is_terminal() {
            self.terminal
        } else {
            self.active
        }
    }
}

/// Job records plus the conversation → current job index.
pub struct JobRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn TimeProvider>,
    ttls: JobTtls,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("ttls", &self.ttls)
            .finish()
    }
}

impl JobRegistry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn TimeProvider>, ttls: JobTtls) -> Self {
        Self { store, clock, ttls }
    }

    /// Register a new pending job and make it the conversation's current one.
    pub async fn create(&self, conversation_id: &ConversationId) -> Result<Job> {
        let now = self.clock.utc_now();
        let id = JobId::compose(conversation_id, now.timestamp_millis(), &random_suffix(6));
        let mut job = Job::new(id, conversation_id.clone(), now);
        job.version = 1;

        let encoded = serde_json::to_string(&job)?;
        self.store
            .set_many(&[
                StoreEntry::new(StoreKeys::job(&job.id), encoded, Some(self.ttls.active)),
                StoreEntry::new(
                    StoreKeys::job_by_conversation(conversation_id),
                    job.id.as_str(),
                    Some(self.ttls.active),
                ),
            ])
            .await?;

        info!(job_id = %job.id, %conversation_id, "Created job");
        Ok(job)
    }

    /// Malformed records read as absent.
    pub async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(read_record(self.store.as_ref(), &StoreKeys::job(id))
            .await?
            .into_option())
    }

    pub async fn get_by_conversation_id(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Job>> {
        let index_key = StoreKeys::job_by_conversation(conversation_id);
        let Some(raw_id) = self.store.get(&index_key).await? else {
            return Ok(None);
        };
        let job = self.get(&JobId::from_raw(raw_id)).await?;
        if job.is_none() {
            debug!(%conversation_id, "Conversation index points at a missing job");
        }
        Ok(job)
    }

    /// Merge `patch` onto the job. Returns `None` when the job does not
    /// exist. Moving to `running` or a terminal status stamps the matching
    /// timestamp unless the patch carries one.
    pub async fn update(&self, id: &JobId, patch: &JobPatch) -> Result<Option<Job>> {
        let key = StoreKeys::job(id);
        let now = self.clock.utc_now();
        let ttls = self.ttls;

        let outcome = update_record::<Job, _>(self.store.as_ref(), &key, |current| {
            let Some(mut job) = current else {
                return Mutation::Skip(None);
            };
            let was_terminal = job.is_terminal();
            job.apply(patch);
            match job.status {
                JobStatus::Running if job.started_at.is_none() => job.started_at = Some(now),
                status if status.is_terminal() && job.finished_at.is_none() => {
                    job.finished_at = Some(now)
                }
                _ => {}
            }
            if was_terminal && !job.is_terminal() {
                warn!(job_id = %job.id, status = job.status.as_str(), "Job left a terminal state");
            }
            let ttl = ttls.for_job(&job);
            Mutation::Write {
                record: job,
                ttl: Some(ttl),
            }
        })
        .await?;

        match outcome {
            UpdateOutcome::Written(job) => {
                if job.is_terminal() {
                    self.extend_index(&job).await?;
                }
                debug!(job_id = %id, status = job.status.as_str(), progress = job.progress, "Updated job");
                Ok(Some(job))
            }
            UpdateOutcome::Skipped(job) => {
                debug!(job_id = %id, "Update for unknown job ignored");
                Ok(job)
            }
        }
    }

    /// Remove the job, and the conversation index when it still points here.
    pub async fn delete(&self, job: &Job) -> Result<()> {
        let mut keys = vec![StoreKeys::job(&job.id)];
        let index_key = StoreKeys::job_by_conversation(&job.conversation_id);
        if self.store.get(&index_key).await?.as_deref() == Some(job.id.as_str()) {
            keys.push(index_key);
        }
        let removed = self.store.delete(&keys).await?;
        debug!(job_id = %job.id, removed, "Deleted job");
        Ok(())
    }

    async fn extend_index(&self, job: &Job) -> Result<()> {
        let index_key = StoreKeys::job_by_conversation(&job.conversation_id);
        if self.store.get(&index_key).await?.as_deref() == Some(job.id.as_str()) {
            self.store.expire(&index_key, self.ttls.terminal).await?;
        }
        Ok(())
    }
}
