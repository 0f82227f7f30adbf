use std::{fmt, sync::Arc};

use convoy_config::Config;
use convoy_core::{Coordinator, RedisConnector, ResilientStore};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    /// The store behind the coordinator, kept for health reporting.
    pub store: Arc<ResilientStore>,
    pub connector: Option<Arc<RedisConnector>>,
    pub config: Arc<Config>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.coordinator.store_backend())
            .field("redis_configured", &self.connector.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }
}
