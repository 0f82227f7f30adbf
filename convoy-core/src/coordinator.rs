use std::{sync::Arc, time::Duration};

use convoy_model::{
    AdmissionDecision, CacheMetrics, CompletionAggregate, ConversationId, CounterKind, Job, JobId,
    JobPatch, JobStatus, ProgressPatch, ProgressRecord, ProgressStatus, ProtectedCounter,
    RateLimitRule, ResultBlobReference,
};
use futures::Stream;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    analysis_cache::{AnalysisCache, DEFAULT_ANALYSIS_TTL},
    counters::{CounterStore, DEFAULT_BACKUP_TTL},
    error::{CoordinationError, Result},
    jobs::{JobRegistry, JobTtls},
    metrics::MetricsAggregator,
    offload::{BlobError, BlobStore, BudgetReport, OffloadOutcome, OffloadPolicy, ResultOffload},
    progress::{DEFAULT_PROGRESS_TTL, ProgressTracker, ReportOutcome, StreamSettings},
    rate_limit::RateLimiter,
    store::{Store, StoreBackend},
    time::TimeProvider,
};

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub job_ttls: JobTtls,
    pub progress_ttl: Duration,
    pub offload: OffloadPolicy,
    pub counter_backup_ttl: Duration,
    pub analysis_cache_ttl: Duration,
    pub stream: StreamSettings,
    pub default_rule: RateLimitRule,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            job_ttls: JobTtls::default(),
            progress_ttl: DEFAULT_PROGRESS_TTL,
            offload: OffloadPolicy::default(),
            counter_backup_ttl: DEFAULT_BACKUP_TTL,
            analysis_cache_ttl: DEFAULT_ANALYSIS_TTL,
            stream: StreamSettings::default(),
            default_rule: RateLimitRule::default(),
        }
    }
}

/// What a client receives when it collects a run's outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub progress: ProgressRecord,
    pub job: Option<Job>,
    /// Whether the records were released. Runs still in flight, or whose
    /// offloaded result could not be fetched, are left in place.
    pub released: bool,
}

/// Entry point for collaborators: every coordination operation, wired
/// over one store, one blob store and one clock.
pub struct Coordinator {
    store: Arc<dyn Store>,
    clock: Arc<dyn TimeProvider>,
    jobs: JobRegistry,
    progress: Arc<ProgressTracker>,
    offload: Arc<ResultOffload>,
    limiter: RateLimiter,
    counters: CounterStore,
    metrics: Arc<MetricsAggregator>,
    analysis: AnalysisCache,
    settings: CoordinatorSettings,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("backend", &self.store.backend())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn TimeProvider>,
        settings: CoordinatorSettings,
    ) -> Self {
        let offload = Arc::new(ResultOffload::new(
            blobs,
            clock.clone(),
            settings.offload.clone(),
        ));
        let metrics = Arc::new(MetricsAggregator::new(store.clone()));
        Self {
            jobs: JobRegistry::new(store.clone(), clock.clone(), settings.job_ttls),
            progress: Arc::new(ProgressTracker::new(
                store.clone(),
                clock.clone(),
                offload.clone(),
                settings.progress_ttl,
            )),
            limiter: RateLimiter::new(store.clone(), clock.clone()),
            counters: CounterStore::new(store.clone(), settings.counter_backup_ttl),
            analysis: AnalysisCache::new(
                store.clone(),
                metrics.clone(),
                settings.analysis_cache_ttl,
            ),
            offload,
            metrics,
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.store.backend()
    }

    pub fn analysis_cache(&self) -> &AnalysisCache {
        &self.analysis
    }

    // Jobs

    /// Register a job and reset the conversation's progress to `starting`.
    pub async fn create_job(&self, conversation_id: &ConversationId) -> Result<Job> {
        let job = self.jobs.create(conversation_id).await?;
        self.progress.begin(conversation_id).await?;
        self.bump(CounterKind::JobsCreated).await;
        Ok(job)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        self.jobs.get(id).await
    }

    pub async fn get_job_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Job>> {
        self.jobs.get_by_conversation_id(conversation_id).await
    }

    pub async fn update_job(&self, id: &JobId, patch: &JobPatch) -> Result<Option<Job>> {
        self.jobs.update(id, patch).await
    }

    /// Mark the job and its progress completed with `result`. The result is
    /// offloaded once and shared by both records; the job keeps it inline
    /// only when it is small.
    pub async fn complete_job(
        &self,
        id: &JobId,
        result: Value,
        duration: Option<Duration>,
    ) -> Result<Job> {
        let job = self.require_job(id).await?;
        if job.is_terminal() {
            info!(job_id = %id, status = job.status.as_str(), "Job already finished");
            return Ok(job);
        }

        let outcome = self.offload.maybe_offload(&job.conversation_id, result).await;
        let mut patch = JobPatch::status(JobStatus::Completed).with_progress(100);
        if let OffloadOutcome::Inline(payload) = &outcome {
            patch.result = Some(payload.clone());
        }
        let job = self
            .jobs
            .update(id, &patch)
            .await?
            .ok_or_else(|| CoordinationError::NotFound(format!("job {id}")))?;

        let reported = self
            .progress
            .report_resolved(
                &job.conversation_id,
                &ProgressPatch::stage(ProgressStatus::Completed, 100),
                Some(outcome),
            )
            .await?;
        if let ReportOutcome::Ignored { current, .. } = reported {
            warn!(
                job_id = %id,
                progress = current.as_str(),
                "Progress already finished; completion result not attached or counted"
            );
            return Ok(job);
        }
        self.bump(CounterKind::JobsCompleted).await;

        let elapsed = duration.unwrap_or_else(|| {
            let started = job.started_at.unwrap_or(job.created_at);
            (self.clock.utc_now() - started).to_std().unwrap_or_default()
        });
        if let Err(err) = self.metrics.record_completion(elapsed).await {
            warn!(job_id = %id, error = %err, "Failed to record completion metrics");
        }

        info!(job_id = %id, elapsed_ms = elapsed.as_millis() as u64, "Job completed");
        Ok(job)
    }

    pub async fn fail_job(&self, id: &JobId, error: &str) -> Result<Job> {
        let job = self.require_job(id).await?;
        if job.is_terminal() {
            info!(job_id = %id, status = job.status.as_str(), "Job already finished");
            return Ok(job);
        }

        let job = self
            .jobs
            .update(id, &JobPatch::status(JobStatus::Failed).with_error(error))
            .await?
            .ok_or_else(|| CoordinationError::NotFound(format!("job {id}")))?;
        self.progress
            .report(
                &job.conversation_id,
                ProgressPatch {
                    status: Some(ProgressStatus::Error),
                    error: Some(error.to_string()),
                    ..ProgressPatch::default()
                },
            )
            .await?;
        self.bump(CounterKind::JobsFailed).await;

        warn!(job_id = %id, error, "Job failed");
        Ok(job)
    }

    // Progress

    pub async fn report_progress(
        &self,
        conversation_id: &ConversationId,
        patch: ProgressPatch,
    ) -> Result<ReportOutcome> {
        self.progress.report(conversation_id, patch).await
    }

    pub async fn read_progress(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<ProgressRecord>> {
        self.progress.read(conversation_id).await
    }

    pub fn watch_progress(
        &self,
        conversation_id: ConversationId,
        settings: Option<StreamSettings>,
    ) -> impl Stream<Item = ProgressRecord> + Send + use<> {
        self.progress
            .watch(conversation_id, settings.unwrap_or(self.settings.stream))
    }

    /// Hand the final state to a client. Finished runs are released: the
    /// progress record, the job and the conversation index are deleted on a
    /// best-effort basis.
    pub async fn deliver(&self, conversation_id: &ConversationId) -> Result<Option<Delivery>> {
        let Some(progress) = self.progress.read(conversation_id).await? else {
            return Ok(None);
        };
        let job = self.jobs.get_by_conversation_id(conversation_id).await?;

        // An unresolved blob means the result is temporarily unavailable.
        if !progress.is_terminal() || progress.blob_ref.is_some() {
            return Ok(Some(Delivery {
                progress,
                job,
                released: false,
            }));
        }

        if let Err(err) = self.progress.delete(conversation_id).await {
            warn!(%conversation_id, error = %err, "Failed to release progress record");
        }
        if let Some(job) = &job
            && let Err(err) = self.jobs.delete(job).await
        {
            warn!(job_id = %job.id, error = %err, "Failed to release job record");
        }
        self.bump(CounterKind::ResultsDelivered).await;
        info!(%conversation_id, status = progress.status.as_str(), "Result delivered");

        Ok(Some(Delivery {
            progress,
            job,
            released: true,
        }))
    }

    // Rate limiting

    pub async fn admit_request(&self, key: &str, max: u32, window: Duration) -> Result<bool> {
        self.limiter.admit(key, max, window).await
    }

    /// Admission under the configured default rule.
    pub async fn admit_default(&self, key: &str) -> Result<AdmissionDecision> {
        self.limiter.admit_rule(key, &self.settings.default_rule).await
    }

    // Counters

    pub async fn increment_counter(&self, kind: CounterKind, by: u64) -> Result<u64> {
        self.counters.increment(kind, by).await
    }

    pub async fn get_counter(&self, kind: CounterKind) -> Result<u64> {
        self.counters.get(kind).await
    }

    pub async fn set_counter(&self, kind: CounterKind, value: u64) -> Result<u64> {
        self.counters.set(kind, value).await
    }

    pub async fn counter_snapshot(&self, kind: CounterKind) -> Result<ProtectedCounter> {
        self.counters.snapshot(kind).await
    }

    pub async fn refresh_counter_backups(&self) -> Result<usize> {
        self.counters.refresh_backups().await
    }

    // Results

    pub async fn offload_result(
        &self,
        conversation_id: &ConversationId,
        payload: Value,
    ) -> OffloadOutcome {
        self.offload.maybe_offload(conversation_id, payload).await
    }

    pub async fn resolve_result(&self, reference: &ResultBlobReference) -> Option<Value> {
        self.offload.resolve(reference).await
    }

    pub async fn enforce_blob_budget(&self) -> std::result::Result<BudgetReport, BlobError> {
        self.offload.enforce_budget().await
    }

    // Metrics

    pub async fn record_completion(&self, duration: Duration) -> Result<CompletionAggregate> {
        self.metrics.record_completion(duration).await
    }

    pub async fn aggregate(&self) -> Result<CompletionAggregate> {
        self.metrics.aggregate().await
    }

    pub async fn cache_metrics(&self) -> Result<CacheMetrics> {
        self.metrics.cache_metrics().await
    }

    pub async fn ping_store(&self) -> Result<()> {
        self.store.ping().await?;
        Ok(())
    }

    async fn require_job(&self, id: &JobId) -> Result<Job> {
        self.jobs
            .get(id)
            .await?
            .ok_or_else(|| CoordinationError::NotFound(format!("job {id}")))
    }

    /// Counter failures never fail the operation that triggered them.
    async fn bump(&self, kind: CounterKind) {
        if let Err(err) = self.counters.increment(kind, 1).await {
            warn!(counter = %kind, error = %err, "Failed to increment counter");
        }
    }
}
