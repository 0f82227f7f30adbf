//! Configuration for Convoy workers.
//!
//! Values come from a TOML file (`convoy.toml`, `config/convoy.toml`, or the
//! path in `CONVOY_CONFIG`), overlaid by environment variables, with a
//! `.env` file loaded first when present. The loader resolves everything into
//! the settings structs of `convoy-core` and reports non-fatal problems as
//! [`ConfigWarnings`].
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{BlobConfig, Config, ConfigMetadata, RedisConfig, ServerConfig};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
