use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as written in a TOML file. Durations are humantime
/// strings such as `"90s"` or `"24h"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub blobs: FileBlobConfig,
    #[serde(default)]
    pub jobs: FileJobConfig,
    #[serde(default)]
    pub progress: FileProgressConfig,
    #[serde(default)]
    pub rate_limit: FileRateLimitConfig,
    #[serde(default)]
    pub counters: FileCounterConfig,
    #[serde(default)]
    pub analysis: FileAnalysisConfig,
    #[serde(default)]
    pub maintenance: FileMaintenanceConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connect_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBlobConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_threshold_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_bytes: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileJobConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_ttl: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileProgressConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRateLimitConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCounterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_ttl: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileAnalysisConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileMaintenanceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_refresh_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_interval: Option<String>,
}

/// Environment-derived configuration values, kept as raw strings so that
/// malformed values are reported by the loader instead of being dropped.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<String>,
    pub redis_url: Option<String>,
    pub redis_command_timeout: Option<String>,
    pub blob_dir: Option<PathBuf>,
    pub inline_threshold_bytes: Option<String>,
    pub blob_budget_bytes: Option<String>,
    pub job_ttl: Option<String>,
    pub terminal_job_ttl: Option<String>,
    pub progress_ttl: Option<String>,
    pub stream_poll_interval: Option<String>,
    pub stream_timeout: Option<String>,
    pub rate_limit_max: Option<String>,
    pub rate_limit_window: Option<String>,
    pub health_interval: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Self {
            config_path: var("CONVOY_CONFIG").map(PathBuf::from),
            server_host: var("SERVER_HOST"),
            server_port: var("SERVER_PORT"),
            redis_url: var("REDIS_URL"),
            redis_command_timeout: var("CONVOY_REDIS_COMMAND_TIMEOUT"),
            blob_dir: var("CONVOY_BLOB_DIR").map(PathBuf::from),
            inline_threshold_bytes: var("CONVOY_INLINE_THRESHOLD_BYTES"),
            blob_budget_bytes: var("CONVOY_BLOB_BUDGET_BYTES"),
            job_ttl: var("CONVOY_JOB_TTL"),
            terminal_job_ttl: var("CONVOY_TERMINAL_JOB_TTL"),
            progress_ttl: var("CONVOY_PROGRESS_TTL"),
            stream_poll_interval: var("CONVOY_STREAM_POLL_INTERVAL"),
            stream_timeout: var("CONVOY_STREAM_TIMEOUT"),
            rate_limit_max: var("CONVOY_RATE_LIMIT_MAX"),
            rate_limit_window: var("CONVOY_RATE_LIMIT_WINDOW"),
            health_interval: var("CONVOY_HEALTH_INTERVAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn blank_variables_are_unset() {
        let vars = HashMap::from([
            ("REDIS_URL", "  "),
            ("SERVER_PORT", "8080"),
            ("CONVOY_BLOB_DIR", "/tmp/blobs"),
        ]);
        let env = EnvConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(env.redis_url, None);
        assert_eq!(env.server_port.as_deref(), Some("8080"));
        assert_eq!(env.blob_dir, Some(PathBuf::from("/tmp/blobs")));
    }

    #[test]
    fn file_sections_are_optional() {
        let parsed: FileConfig = toml::from_str("[server]\nport = 4000\n").unwrap();
        assert_eq!(parsed.server.port, Some(4000));
        assert!(parsed.redis.is_none());
        assert!(parsed.jobs.ttl.is_none());
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(toml::from_str::<FileConfig>("[database]\nurl = \"x\"\n").is_err());
    }
}
