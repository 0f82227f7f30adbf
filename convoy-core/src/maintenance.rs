//! Periodic upkeep: store health, counter backups and blob budget.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    coordinator::Coordinator,
    store::{LocalStore, RedisConnector},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSettings {
    pub health_interval: Duration,
    pub backup_refresh_interval: Duration,
    pub budget_interval: Duration,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            backup_refresh_interval: Duration::from_secs(60 * 60),
            budget_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Handles of the running maintenance loops.
#[derive(Debug)]
pub struct MaintenanceTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; start after one period.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task = name, "Maintenance task stopping");
                    break;
                }
                _ = ticker.tick() => task().await,
            }
        }
    })
}

impl MaintenanceTasks {
    pub fn spawn(
        coordinator: Arc<Coordinator>,
        connector: Option<Arc<RedisConnector>>,
        local: Option<Arc<LocalStore>>,
        settings: MaintenanceSettings,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(3);

        handles.push(spawn_periodic(
            "store-health",
            settings.health_interval,
            cancel.clone(),
            move || {
                let connector = connector.clone();
                let local = local.clone();
                async move {
                    if let Some(connector) = connector {
                        if connector.health_check().await {
                            debug!("Redis healthy");
                        } else {
                            warn!("Redis unhealthy; requests are served from the local fallback");
                        }
                    }
                    if let Some(local) = local {
                        local.sweep_expired();
                    }
                }
            },
        ));

        let counters = coordinator.clone();
        handles.push(spawn_periodic(
            "counter-backups",
            settings.backup_refresh_interval,
            cancel.clone(),
            move || {
                let coordinator = counters.clone();
                async move {
                    if let Err(err) = coordinator.refresh_counter_backups().await {
                        warn!(error = %err, "Counter backup refresh failed");
                    }
                }
            },
        ));

        handles.push(spawn_periodic(
            "blob-budget",
            settings.budget_interval,
            cancel.clone(),
            move || {
                let coordinator = coordinator.clone();
                async move {
                    match coordinator.enforce_blob_budget().await {
                        Ok(report) if report.deleted > 0 => {
                            info!(deleted = report.deleted, freed_bytes = report.freed_bytes, "Blob budget pass");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "Blob budget pass failed"),
                    }
                }
            },
        ));

        info!(
            health_secs = settings.health_interval.as_secs(),
            backup_secs = settings.backup_refresh_interval.as_secs(),
            budget_secs = settings.budget_interval.as_secs(),
            "Maintenance tasks started"
        );
        Self { cancel, handles }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "Maintenance task ended abnormally");
            }
        }
        info!("Maintenance tasks stopped");
    }
}
