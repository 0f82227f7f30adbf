use std::path::{Path, PathBuf};

use anyhow::Context;
use convoy_core::{ConnectionSettings, CoordinatorSettings, MaintenanceSettings};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    /// `None` runs the worker on its process-local store only.
    pub redis: Option<RedisConfig>,
    pub blobs: BlobConfig,
    pub coordinator: CoordinatorSettings,
    pub maintenance: MaintenanceSettings,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Create the on-disk blob directory when one is configured.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(root) = &self.blobs.root {
            std::fs::create_dir_all(root).with_context(|| {
                format!("failed to create blob directory {}", root.display())
            })?;
        }
        Ok(())
    }

    pub fn blob_root(&self) -> Option<&Path> {
        self.blobs.root.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
    pub connection: ConnectionSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobConfig {
    /// Directory of the on-disk blob store. Without one, offloaded results
    /// live in memory and are lost on restart.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
