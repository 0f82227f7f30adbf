use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use redis::{RedisError, RedisResult, Script, aio::ConnectionManager};
use tracing::{debug, warn};

use super::{
    RedisConnector, Store, StoreBackend, StoreEntry, StoreError, StoreResult,
    WindowRequest, WriteGuard, ttl_millis, versioned::stored_version,
};

/// Server-side scripts. Each runs atomically on the Redis server.
mod scripts {
    use redis::Script;

    /// Sliding window log: purge, count, admit.
    pub fn sliding_window() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local window = tonumber(ARGV[2])
            local limit = tonumber(ARGV[3])
            local member = ARGV[4]

            -- Drop entries that fell out of the trailing window
            redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)

            local current = redis.call('ZCARD', key)
            if current >= limit then
                return {0, current}
            end

            redis.call('ZADD', key, now, member)
            redis.call('PEXPIRE', key, window)
            return {1, current + 1}
            "#,
        )
    }

    /// Compare-and-set on the `version` field of a JSON document.
    ///
    /// ARGV[1] is `absent`, `any` or the expected version.
    pub fn versioned_set() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local guard = ARGV[1]
            local payload = ARGV[2]
            local ttl = tonumber(ARGV[3])

            local current = redis.call('GET', key)
            local version = nil
            if current then
                local ok, doc = pcall(cjson.decode, current)
                if ok and type(doc) == 'table' then
                    version = tonumber(doc['version']) or 0
                end
            end

            if guard == 'absent' then
                if version ~= nil then
                    return 0
                end
            elseif guard ~= 'any' then
                if version == nil or version ~= tonumber(guard) then
                    return 0
                end
            end

            if ttl and ttl > 0 then
                redis.call('SET', key, payload, 'PX', ttl)
            else
                redis.call('SET', key, payload)
            end
            return 1
            "#,
        )
    }
}

/// Redis-backed [`Store`].
///
/// Connection-class failures drop the connection held by the connector
/// and surface as [`StoreError::Unavailable`]. When the server refuses
/// scripting, script-backed operations switch to plain command sequences
/// that are not atomic across workers.
pub struct RemoteStore {
    connector: Arc<RedisConnector>,
    window_script: Script,
    versioned_script: Script,
    scripting_disabled: AtomicBool,
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("connector", &self.connector)
            .field(
                "scripting_disabled",
                &self.scripting_disabled.load(Ordering::Relaxed),
            )
            .finish()
    }
}

fn is_script_rejection(message: &str) -> bool {
    let message = message.to_lowercase();
    ["unknown command", "scripting is disabled", "not allowed", "noscript"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// Error replies from a reachable server.
fn classify_reply(message: String) -> StoreError {
    if is_script_rejection(&message) {
        StoreError::ScriptUnsupported(message)
    } else {
        StoreError::Backend(message)
    }
}

fn classify(err: &RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
        StoreError::Unavailable(err.to_string())
    } else {
        classify_reply(err.to_string())
    }
}

impl RemoteStore {
    pub fn new(connector: Arc<RedisConnector>) -> Self {
        Self {
            connector,
            window_script: scripts::sliding_window(),
            versioned_script: scripts::versioned_set(),
            scripting_disabled: AtomicBool::new(false),
        }
    }

    /// Start with the command-sequence paths, for servers known to refuse
    /// scripting.
    pub fn with_scripting(self, enabled: bool) -> Self {
        self.scripting_disabled.store(!enabled, Ordering::Relaxed);
        self
    }

    pub fn connector(&self) -> &Arc<RedisConnector> {
        &self.connector
    }

    async fn conn(&self) -> StoreResult<ConnectionManager> {
        self.connector.connection().await.ok_or_else(|| {
            StoreError::Unavailable("no Redis connection".to_string())
        })
    }

    /// Await one command under the command timeout and map its failure.
    async fn run<T, F>(&self, op: &'static str, command: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let timeout = self.connector.settings().command_timeout;
        let error = match tokio::time::timeout(timeout, command).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => classify(&err),
            Err(_) => StoreError::Unavailable(format!("{op} timed out")),
        };
        if error.is_unavailable() {
            self.connector.invalidate(op).await;
        }
        debug!(op, error = %error, "Redis command failed");
        Err(error)
    }

    fn scripting_enabled(&self) -> bool {
        !self.scripting_disabled.load(Ordering::Relaxed)
    }

    fn disable_scripting(&self, reason: &StoreError) {
        if !self.scripting_disabled.swap(true, Ordering::Relaxed) {
            warn!(
                error = %reason,
                "Redis rejects scripting; falling back to non-atomic command \
                 sequences (rate limiting and versioned writes may race across workers)"
            );
        }
    }

    async fn window_admit_unscripted(
        &self,
        conn: &mut ConnectionManager,
        key: &str,
        request: &WindowRequest,
    ) -> StoreResult<bool> {
        debug!(key, "Non-atomic sliding window admission");
        self.run(
            "ZREMRANGEBYSCORE",
            redis::cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg("-inf")
                .arg(request.cutoff_ms())
                .query_async::<()>(conn),
        )
        .await?;
        let current: u64 = self
            .run("ZCARD", redis::cmd("ZCARD").arg(key).query_async(conn))
            .await?;
        if current >= u64::from(request.max) {
            return Ok(false);
        }
        self.run(
            "ZADD",
            redis::pipe()
                .cmd("ZADD")
                .arg(key)
                .arg(request.now_ms)
                .arg(&request.member)
                .ignore()
                .cmd("PEXPIRE")
                .arg(key)
                .arg(request.window_ms.max(1))
                .ignore()
                .query_async::<()>(conn),
        )
        .await?;
        Ok(true)
    }

    async fn set_versioned_unscripted(
        &self,
        conn: &mut ConnectionManager,
        key: &str,
        guard: WriteGuard,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let current: Option<String> = self
            .run("GET", redis::cmd("GET").arg(key).query_async(conn))
            .await?;
        if !guard.admits(current.as_deref().and_then(stored_version)) {
            return Ok(false);
        }
        self.run("SET", set_command(key, value, ttl).query_async::<()>(conn))
            .await?;
        Ok(true)
    }
}

fn set_command(key: &str, value: &str, ttl: Option<Duration>) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
        cmd.arg("PX").arg(ttl_millis(ttl));
    }
    cmd
}

#[async_trait]
impl Store for RemoteStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Remote
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        self.run("PING", redis::cmd("PING").query_async::<String>(&mut conn))
            .await
            .map(|_| ())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        self.run("GET", redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        self.run("MGET", redis::cmd("MGET").arg(keys).query_async(&mut conn))
            .await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        self.run(
            "SET",
            set_command(key, value, ttl).query_async::<()>(&mut conn),
        )
        .await
    }

    async fn set_many(&self, entries: &[StoreEntry]) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for entry in entries {
            pipe.cmd("SET").arg(&entry.key).arg(&entry.value);
            if let Some(ttl) = entry.ttl {
                pipe.arg("PX").arg(ttl_millis(ttl));
            }
            pipe.ignore();
        }
        let mut conn = self.conn().await?;
        self.run("SET batch", pipe.query_async::<()>(&mut conn)).await
    }

    async fn set_versioned(
        &self,
        key: &str,
        guard: WriteGuard,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        if self.scripting_enabled() {
            let ttl_ms = ttl.map(ttl_millis).unwrap_or(0);
            let outcome = self
                .run(
                    "versioned SET",
                    self.versioned_script
                        .key(key)
                        .arg(guard.as_arg())
                        .arg(value)
                        .arg(ttl_ms)
                        .invoke_async::<i64>(&mut conn),
                )
                .await;
            match outcome {
                Ok(written) => return Ok(written == 1),
                Err(err @ StoreError::ScriptUnsupported(_)) => {
                    self.disable_scripting(&err)
                }
                Err(err) => return Err(err),
            }
        }
        self.set_versioned_unscripted(&mut conn, key, guard, value, ttl)
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let updated: i64 = self
            .run(
                "PEXPIRE",
                redis::cmd("PEXPIRE")
                    .arg(key)
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(updated > 0)
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        self.run("DEL", redis::cmd("DEL").arg(keys).query_async(&mut conn))
            .await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        self.run(
            "INCRBY",
            redis::cmd("INCRBY").arg(key).arg(delta).query_async(&mut conn),
        )
        .await
    }

    async fn window_admit(
        &self,
        key: &str,
        request: &WindowRequest,
    ) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        if self.scripting_enabled() {
            let outcome = self
                .run(
                    "sliding window",
                    self.window_script
                        .key(key)
                        .arg(request.now_ms)
                        .arg(request.window_ms.max(1))
                        .arg(request.max)
                        .arg(&request.member)
                        .invoke_async::<Vec<i64>>(&mut conn),
                )
                .await;
            match outcome {
                Ok(reply) => return Ok(reply.first().copied() == Some(1)),
                Err(err @ StoreError::ScriptUnsupported(_)) => {
                    self.disable_scripting(&err)
                }
                Err(err) => return Err(err),
            }
        }
        self.window_admit_unscripted(&mut conn, key, request).await
    }
}
