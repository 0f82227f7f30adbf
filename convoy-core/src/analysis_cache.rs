use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::{CoordinationError, Result},
    keys::StoreKeys,
    metrics::MetricsAggregator,
    store::Store,
};

pub const DEFAULT_ANALYSIS_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Finished analysis results keyed by analysis id. Lookups feed the cache
/// hit rate reported by [`MetricsAggregator`].
pub struct AnalysisCache {
    store: Arc<dyn Store>,
    metrics: Arc<MetricsAggregator>,
    ttl: Duration,
}

impl std::fmt::Debug for AnalysisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisCache")
            .field("ttl", &self.ttl)
            .finish()
    }
}

fn validate(analysis_id: &str) -> Result<()> {
    if analysis_id.trim().is_empty() {
        return Err(CoordinationError::InvalidInput(
            "analysis id must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl AnalysisCache {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<MetricsAggregator>, ttl: Duration) -> Self {
        Self {
            store,
            metrics,
            ttl,
        }
    }

    /// Malformed entries count as misses.
    pub async fn get(&self, analysis_id: &str) -> Result<Option<Value>> {
        validate(analysis_id)?;
        let key = StoreKeys::analysis(analysis_id);
        let cached = match self.store.get(&key).await? {
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key, error = %err, "Discarding malformed cached analysis");
                    None
                }
            },
            None => None,
        };

        let recorded = if cached.is_some() {
            debug!(key, "Analysis cache HIT");
            self.metrics.record_cache_hit().await
        } else {
            debug!(key, "Analysis cache MISS");
            self.metrics.record_cache_miss().await
        };
        if let Err(err) = recorded {
            warn!(error = %err, "Failed to record cache metrics");
        }
        Ok(cached)
    }

    pub async fn put(&self, analysis_id: &str, payload: &Value) -> Result<()> {
        validate(analysis_id)?;
        let encoded = serde_json::to_string(payload)?;
        self.store
            .set(&StoreKeys::analysis(analysis_id), &encoded, Some(self.ttl))
            .await?;
        Ok(())
    }
}
