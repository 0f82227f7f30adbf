//! Redis connection lifecycle.
//!
//! The connector owns the one connection slot of a worker: it connects
//! lazily, probes the live connection with `PING` at most once per health
//! interval, tears it down when a probe or a command fails, and backs off
//! after failed attempts. While cooling down callers get `None` straight
//! away instead of waiting on a dead server.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use redis::aio::ConnectionManager;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use super::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub health_check_interval: Duration,
    pub max_connect_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// How long to refuse new attempts after giving up.
    pub cooldown: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(2),
            health_check_interval: Duration::from_secs(30),
            max_connect_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
            cooldown: Duration::from_secs(5),
        }
    }
}

/// Capped exponential backoff: `base * 2^(attempt - 1)`, at most `max`.
pub fn exponential_backoff(base: Duration, attempt: u32, max: Duration) -> Duration {
    let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(multiplier).min(max)
}

struct LiveConnection {
    conn: ConnectionManager,
    last_probe: Instant,
}

#[derive(Default)]
struct ConnectorState {
    live: Option<LiveConnection>,
    cooldown_until: Option<Instant>,
    last_error: Option<StoreError>,
}

pub struct RedisConnector {
    client: redis::Client,
    settings: ConnectionSettings,
    // Held across connection attempts so concurrent callers share one.
    state: Mutex<ConnectorState>,
    attempts: AtomicU64,
}

impl std::fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnector")
            .field("settings", &self.settings)
            .finish()
    }
}

impl RedisConnector {
    /// Validates the URL only; nothing is dialled until first use.
    pub fn new(redis_url: &str, settings: ConnectionSettings) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            StoreError::Backend(format!("Invalid Redis URL: {e}"))
        })?;
        Ok(Self {
            client,
            settings,
            state: Mutex::new(ConnectorState::default()),
            attempts: AtomicU64::new(0),
        })
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Completed connection attempts, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Establish the connection now, ignoring any cooldown. Callers that
    /// queued behind an attempt share its outcome instead of dialling again.
    pub async fn connect(&self) -> StoreResult<()> {
        let seen = self.connect_attempts();
        let mut state = self.state.lock().await;
        if state.live.is_some() {
            return Ok(());
        }
        if self.connect_attempts() != seen
            && let Some(err) = &state.last_error
        {
            return Err(err.clone());
        }
        self.attempt(&mut state).await.map(|_| ())
    }

    /// A usable connection, or `None` while the server is unreachable.
    pub async fn connection(&self) -> Option<ConnectionManager> {
        let mut state = self.state.lock().await;

        if let Some(live) = state.live.as_mut() {
            if live.last_probe.elapsed() < self.settings.health_check_interval {
                return Some(live.conn.clone());
            }
            match self.probe(&mut live.conn).await {
                Ok(()) => {
                    live.last_probe = Instant::now();
                    return Some(live.conn.clone());
                }
                Err(err) => {
                    warn!(error = %err, "Redis health probe failed, dropping connection");
                    state.live = None;
                }
            }
        }

        if let Some(until) = state.cooldown_until {
            if Instant::now() < until {
                debug!("Redis connector cooling down");
                return None;
            }
            state.cooldown_until = None;
        }

        match self.attempt(&mut state).await {
            Ok(conn) => Some(conn),
            Err(err) => {
                warn!(
                    error = %err,
                    cooldown_ms = self.settings.cooldown.as_millis() as u64,
                    "Giving up on Redis for now"
                );
                state.cooldown_until = Some(Instant::now() + self.settings.cooldown);
                None
            }
        }
    }

    /// Probe the server immediately. Returns whether it answered.
    pub async fn health_check(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.live.is_none() {
            drop(state);
            return self.connection().await.is_some();
        }
        let Some(live) = state.live.as_mut() else {
            return false;
        };
        match self.probe(&mut live.conn).await {
            Ok(()) => {
                live.last_probe = Instant::now();
                true
            }
            Err(err) => {
                warn!(error = %err, "Redis health check failed");
                state.live = None;
                false
            }
        }
    }

    /// Tear down the current connection so the next call reconnects.
    pub async fn invalidate(&self, reason: &str) {
        let mut state = self.state.lock().await;
        if state.live.take().is_some() {
            warn!(reason, "Dropping Redis connection");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.live.is_some()
    }

    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.live.take().is_some() {
            info!("Closed Redis connection");
        }
        state.cooldown_until = None;
    }

    /// One establish run with the state lock held; records the outcome.
    async fn attempt(&self, state: &mut ConnectorState) -> StoreResult<ConnectionManager> {
        let result = self.establish().await;
        self.attempts.fetch_add(1, Ordering::AcqRel);
        match &result {
            Ok(conn) => {
                state.live = Some(LiveConnection {
                    conn: conn.clone(),
                    last_probe: Instant::now(),
                });
                state.cooldown_until = None;
                state.last_error = None;
            }
            Err(err) => state.last_error = Some(err.clone()),
        }
        result
    }

    async fn probe(&self, conn: &mut ConnectionManager) -> StoreResult<()> {
        let cmd = redis::cmd("PING");
        let ping = cmd.query_async::<String>(conn);
        match tokio::time::timeout(self.settings.command_timeout, ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(StoreError::Unavailable(err.to_string())),
            Err(_) => Err(StoreError::Unavailable("PING timed out".to_string())),
        }
    }

    async fn establish(&self) -> StoreResult<ConnectionManager> {
        let attempts = self.settings.max_connect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let connect = ConnectionManager::new(self.client.clone());
            match tokio::time::timeout(self.settings.connect_timeout, connect).await {
                Ok(Ok(conn)) => {
                    info!(attempt, "Connected to Redis");
                    return Ok(conn);
                }
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = "connect timed out".to_string(),
            }

            if attempt < attempts {
                let delay = exponential_backoff(
                    self.settings.backoff_base,
                    attempt,
                    self.settings.backoff_max,
                );
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Redis connect failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(StoreError::Unavailable(format!(
            "Failed to connect to Redis after {attempts} attempts: {last_error}"
        )))
    }
}
