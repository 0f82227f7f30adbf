use std::{sync::Arc, time::Duration};

use convoy_model::{CacheMetrics, CompletionAggregate};
use tracing::{debug, warn};

use crate::{
    error::{CoordinationError, Result},
    keys::StoreKeys,
    store::{
        Mutation, Store, UpdateOutcome,
        versioned::{read_record, update_record},
    },
};

/// Rolling completion statistics and cache hit rate, kept in the shared
/// store without per-event history.
pub struct MetricsAggregator {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator").finish()
    }
}

fn parse_count(key: &str, raw: Option<String>) -> u64 {
    match raw.map(|raw| raw.parse::<u64>()) {
        Some(Ok(count)) => count,
        Some(Err(_)) => {
            warn!(key, "Ignoring unreadable metrics counter");
            0
        }
        None => 0,
    }
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn record_completion(&self, duration: Duration) -> Result<CompletionAggregate> {
        let duration_ms = duration.as_secs_f64() * 1_000.0;
        let outcome = update_record::<CompletionAggregate, _>(
            self.store.as_ref(),
            &StoreKeys::completions(),
            |current| {
                let mut aggregate = current.unwrap_or_default();
                aggregate.record(duration_ms);
                Mutation::Write {
                    record: aggregate,
                    ttl: None,
                }
            },
        )
        .await?;

        match outcome {
            UpdateOutcome::Written(aggregate) => {
                debug!(
                    total = aggregate.total_count,
                    average_ms = aggregate.average_duration_ms,
                    "Recorded completion"
                );
                Ok(aggregate)
            }
            UpdateOutcome::Skipped(_) => Err(CoordinationError::Conflict(StoreKeys::completions())),
        }
    }

    pub async fn aggregate(&self) -> Result<CompletionAggregate> {
        Ok(
            read_record::<CompletionAggregate>(self.store.as_ref(), &StoreKeys::completions())
                .await?
                .into_option()
                .unwrap_or_default(),
        )
    }

    pub async fn record_cache_hit(&self) -> Result<()> {
        self.store.incr_by(&StoreKeys::cache_hits(), 1).await?;
        Ok(())
    }

    pub async fn record_cache_miss(&self) -> Result<()> {
        self.store.incr_by(&StoreKeys::cache_misses(), 1).await?;
        Ok(())
    }

    pub async fn cache_metrics(&self) -> Result<CacheMetrics> {
        let keys = [StoreKeys::cache_hits(), StoreKeys::cache_misses()];
        let mut values = self.store.get_many(&keys).await?.into_iter();
        let hits = parse_count(&keys[0], values.next().flatten());
        let misses = parse_count(&keys[1], values.next().flatten());
        Ok(CacheMetrics::from_counts(hits, misses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::LocalStore, time::VirtualTimeProvider};

    fn aggregator() -> MetricsAggregator {
        let store = Arc::new(LocalStore::new(Arc::new(VirtualTimeProvider::default())));
        MetricsAggregator::new(store)
    }

    #[tokio::test]
    async fn completion_average_is_rolling() {
        let metrics = aggregator();
        for secs in [1, 2, 6] {
            metrics
                .record_completion(Duration::from_secs(secs))
                .await
                .unwrap();
        }

        let aggregate = metrics.aggregate().await.unwrap();
        assert_eq!(aggregate.total_count, 3);
        assert!((aggregate.average_duration_ms - 3_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_metrics_are_zero() {
        let metrics = aggregator();
        assert_eq!(metrics.aggregate().await.unwrap().total_count, 0);
        assert_eq!(metrics.cache_metrics().await.unwrap().hit_rate, 0.0);
    }

    #[tokio::test]
    async fn hit_rate_tracks_hits_and_misses() {
        let metrics = aggregator();
        metrics.record_cache_hit().await.unwrap();
        metrics.record_cache_hit().await.unwrap();
        metrics.record_cache_hit().await.unwrap();
        metrics.record_cache_miss().await.unwrap();

        let cache = metrics.cache_metrics().await.unwrap();
        assert_eq!((cache.hits, cache.misses), (3, 1));
        assert_eq!(cache.hit_rate, 0.75);
    }
}
