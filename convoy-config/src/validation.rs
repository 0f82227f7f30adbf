use thiserror::Error;
use tracing::warn;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
    #[error(
        "stream poll interval ({poll_ms} ms) must be shorter than the stream timeout ({timeout_ms} ms)"
    )]
    PollIntervalTooLong { poll_ms: u128, timeout_ms: u128 },
    #[error("unsupported Redis URL scheme in '{url}'")]
    UnsupportedRedisScheme { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.items.iter().any(|item| item.message.contains(needle))
    }

    pub fn log(&self) {
        for item in &self.items {
            match &item.hint {
                Some(hint) => warn!(hint = %hint, "{}", item.message),
                None => warn!("{}", item.message),
            }
        }
    }
}

const REDIS_SCHEMES: [&str; 4] = ["redis://", "rediss://", "unix://", "redis+unix://"];

/// Reject settings the coordination layer cannot run with and collect
/// warnings for the ones it runs with in a reduced form.
pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let settings = &config.coordinator;

    for (field, value) in [
        ("jobs.ttl", settings.job_ttls.active),
        ("jobs.terminal_ttl", settings.job_ttls.terminal),
        ("progress.ttl", settings.progress_ttl),
        ("progress.poll_interval", settings.stream.poll_interval),
        ("progress.stream_timeout", settings.stream.timeout),
        ("rate_limit.window", settings.default_rule.window),
        ("counters.backup_ttl", settings.counter_backup_ttl),
        ("analysis.ttl", settings.analysis_cache_ttl),
    ] {
        if value.is_zero() {
            return Err(ConfigGuardRailError::ZeroValue { field });
        }
    }
    if settings.default_rule.max == 0 {
        return Err(ConfigGuardRailError::ZeroValue {
            field: "rate_limit.max",
        });
    }
    if settings.stream.poll_interval >= settings.stream.timeout {
        return Err(ConfigGuardRailError::PollIntervalTooLong {
            poll_ms: settings.stream.poll_interval.as_millis(),
            timeout_ms: settings.stream.timeout.as_millis(),
        });
    }

    match &config.redis {
        Some(redis) => {
            if !REDIS_SCHEMES.iter().any(|scheme| redis.url.starts_with(scheme)) {
                return Err(ConfigGuardRailError::UnsupportedRedisScheme {
                    url: redis.url.clone(),
                });
            }
        }
        None => warnings.push_with_hint(
            "No Redis configured; coordination state is local to this worker",
            "Set REDIS_URL or [redis].url to share state between workers",
        ),
    }

    if config.blobs.root.is_none() {
        warnings.push_with_hint(
            "No blob directory configured; offloaded results are kept in memory",
            "Set CONVOY_BLOB_DIR or [blobs].root to persist large results",
        );
    }

    let offload = &settings.offload;
    if offload.budget_bytes < offload.inline_threshold_bytes as u64 {
        warnings.push(format!(
            "Blob budget ({} bytes) is below the inline threshold ({} bytes); \
             every offloaded result will be evicted on the next budget pass",
            offload.budget_bytes, offload.inline_threshold_bytes
        ));
    }

    if settings.job_ttls.terminal < settings.job_ttls.active {
        warnings.push("Terminal job TTL is shorter than the active job TTL");
    }

    Ok(warnings)
}
