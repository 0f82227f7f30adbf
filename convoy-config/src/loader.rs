use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use convoy_core::{
    ConnectionSettings, CoordinatorSettings, MaintenanceSettings, OffloadPolicy,
    jobs::JobTtls, model::RateLimitRule, progress::StreamSettings,
};
use thiserror::Error;

use super::{
    models::{BlobConfig, Config, ConfigMetadata, RedisConfig, ServerConfig},
    sources::{EnvConfig, FileConfig, FileRedisConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] = ["convoy.toml", "config/convoy.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Use these values instead of the process environment. No `.env` file
    /// is read in that case.
    pub env: Option<EnvConfig>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value '{value}' for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("filesystem initialization failed")]
    Filesystem { source: anyhow::Error },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

/// Environment value first, then the file value, parsed as a humantime
/// duration.
fn duration(
    field: &'static str,
    env: Option<&String>,
    file: Option<&String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match env.or(file) {
        Some(raw) => humantime::parse_duration(raw.trim()).map_err(|err| {
            ConfigLoadError::InvalidValue {
                field,
                value: raw.clone(),
                reason: err.to_string(),
            }
        }),
        None => Ok(default),
    }
}

fn number<T>(field: &'static str, env: Option<&String>, file: Option<T>, default: T) -> Result<T, ConfigLoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env {
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigLoadError::InvalidValue {
            field,
            value: raw.clone(),
            reason: err.to_string(),
        }),
        None => Ok(file.unwrap_or(default)),
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.options.env = Some(env);
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let (env, env_file_loaded) = match &self.options.env {
            Some(env) => (env.clone(), false),
            None => {
                let loaded = self.load_env_file()?;
                (EnvConfig::gather(), loaded)
            }
        };

        let (file, config_path) = self.load_file_config(&env)?;
        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push_with_hint(
                "No convoy.toml detected; using environment variables and defaults",
                "Create convoy.toml or set CONVOY_CONFIG to point at one",
            );
        }

        let config = compose_config(
            file.unwrap_or_default(),
            &env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        )?;
        config
            .ensure_directories()
            .map_err(|source| ConfigLoadError::Filesystem { source })?;

        warnings.extend(validation::apply_guard_rails(&config)?);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        // A missing file is not an error; a malformed one is.
        match loaded {
            Ok(loaded) => Ok(loaded),
            Err(dotenvy::Error::Io(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let requested = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match requested {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((None, None)),
            },
        };

        let file = read_file_config(&path)?;
        Ok((Some(file), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn compose_config(
    file: FileConfig,
    env: &EnvConfig,
    metadata: ConfigMetadata,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        server: file_server,
        redis: file_redis,
        blobs: file_blobs,
        jobs: file_jobs,
        progress: file_progress,
        rate_limit: file_rate_limit,
        counters: file_counters,
        analysis: file_analysis,
        maintenance: file_maintenance,
    } = file;

    let server_defaults = ServerConfig::default();
    let server = ServerConfig {
        host: env
            .server_host
            .clone()
            .or(file_server.host)
            .unwrap_or(server_defaults.host),
        port: number(
            "SERVER_PORT",
            env.server_port.as_ref(),
            file_server.port,
            server_defaults.port,
        )?,
    };

    let redis = resolve_redis(env, file_redis)?;

    let coordinator_defaults = CoordinatorSettings::default();
    let offload_defaults = OffloadPolicy::default();
    let offload = OffloadPolicy {
        inline_threshold_bytes: number(
            "blobs.inline_threshold_bytes",
            env.inline_threshold_bytes.as_ref(),
            file_blobs.inline_threshold_bytes,
            offload_defaults.inline_threshold_bytes,
        )?,
        budget_bytes: number(
            "blobs.budget_bytes",
            env.blob_budget_bytes.as_ref(),
            file_blobs.budget_bytes,
            offload_defaults.budget_bytes,
        )?,
        prefixes: offload_defaults.prefixes,
    };
    let blobs = BlobConfig {
        root: env.blob_dir.clone().or(file_blobs.root),
    };

    let job_ttls = JobTtls {
        active: duration(
            "jobs.ttl",
            env.job_ttl.as_ref(),
            file_jobs.ttl.as_ref(),
            coordinator_defaults.job_ttls.active,
        )?,
        terminal: duration(
            "jobs.terminal_ttl",
            env.terminal_job_ttl.as_ref(),
            file_jobs.terminal_ttl.as_ref(),
            coordinator_defaults.job_ttls.terminal,
        )?,
    };

    let stream = StreamSettings {
        poll_interval: duration(
            "progress.poll_interval",
            env.stream_poll_interval.as_ref(),
            file_progress.poll_interval.as_ref(),
            coordinator_defaults.stream.poll_interval,
        )?,
        timeout: duration(
            "progress.stream_timeout",
            env.stream_timeout.as_ref(),
            file_progress.stream_timeout.as_ref(),
            coordinator_defaults.stream.timeout,
        )?,
    };

    let rule_defaults = coordinator_defaults.default_rule.clone();
    let default_rule = RateLimitRule {
        name: rule_defaults.name,
        max: number(
            "rate_limit.max",
            env.rate_limit_max.as_ref(),
            file_rate_limit.max,
            rule_defaults.max,
        )?,
        window: duration(
            "rate_limit.window",
            env.rate_limit_window.as_ref(),
            file_rate_limit.window.as_ref(),
            rule_defaults.window,
        )?,
    };

    let coordinator = CoordinatorSettings {
        job_ttls,
        progress_ttl: duration(
            "progress.ttl",
            env.progress_ttl.as_ref(),
            file_progress.ttl.as_ref(),
            coordinator_defaults.progress_ttl,
        )?,
        offload,
        counter_backup_ttl: duration(
            "counters.backup_ttl",
            None,
            file_counters.backup_ttl.as_ref(),
            coordinator_defaults.counter_backup_ttl,
        )?,
        analysis_cache_ttl: duration(
            "analysis.ttl",
            None,
            file_analysis.ttl.as_ref(),
            coordinator_defaults.analysis_cache_ttl,
        )?,
        stream,
        default_rule,
    };

    let maintenance_defaults = MaintenanceSettings::default();
    let maintenance = MaintenanceSettings {
        health_interval: duration(
            "maintenance.health_interval",
            env.health_interval.as_ref(),
            file_maintenance.health_interval.as_ref(),
            maintenance_defaults.health_interval,
        )?,
        backup_refresh_interval: duration(
            "maintenance.backup_refresh_interval",
            None,
            file_maintenance.backup_refresh_interval.as_ref(),
            maintenance_defaults.backup_refresh_interval,
        )?,
        budget_interval: duration(
            "maintenance.budget_interval",
            None,
            file_maintenance.budget_interval.as_ref(),
            maintenance_defaults.budget_interval,
        )?,
    };

    Ok(Config {
        server,
        redis,
        blobs,
        coordinator,
        maintenance,
        metadata,
    })
}

fn resolve_redis(
    env: &EnvConfig,
    file_redis: Option<FileRedisConfig>,
) -> Result<Option<RedisConfig>, ConfigLoadError> {
    let url = env
        .redis_url
        .clone()
        .or_else(|| file_redis.as_ref().map(|redis| redis.url.clone()))
        .filter(|url| !url.trim().is_empty());
    let Some(url) = url else {
        return Ok(None);
    };

    let file = file_redis.as_ref();
    let defaults = ConnectionSettings::default();
    let connection = ConnectionSettings {
        connect_timeout: duration(
            "redis.connect_timeout",
            None,
            file.and_then(|redis| redis.connect_timeout.as_ref()),
            defaults.connect_timeout,
        )?,
        command_timeout: duration(
            "redis.command_timeout",
            env.redis_command_timeout.as_ref(),
            file.and_then(|redis| redis.command_timeout.as_ref()),
            defaults.command_timeout,
        )?,
        health_check_interval: duration(
            "redis.health_check_interval",
            None,
            file.and_then(|redis| redis.health_check_interval.as_ref()),
            defaults.health_check_interval,
        )?,
        max_connect_attempts: file
            .and_then(|redis| redis.max_connect_attempts)
            .unwrap_or(defaults.max_connect_attempts)
            .max(1),
        cooldown: duration(
            "redis.cooldown",
            None,
            file.and_then(|redis| redis.cooldown.as_ref()),
            defaults.cooldown,
        )?,
        ..defaults
    };

    Ok(Some(RedisConfig {
        url: url.trim().to_string(),
        connection,
    }))
}
