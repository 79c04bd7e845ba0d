//! Redis lock backend.
//!
//! `SET NX PX` for acquisition and a server-side Lua script for release, so
//! both operations are atomic on the Redis side.

use async_trait::async_trait;
use docket_core::LockError;
use once_cell::sync::Lazy;
use redis::Script;
use std::time::Duration;

use super::backend::LockBackend;

/// Compare-and-delete: delete the lock only if the stored value still
/// equals the presented token. Runs server-side so no other command can
/// interleave between the GET and the DEL.
static UNLOCK_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        else
            return 0
        end
        "#,
    )
});

/// Lock backend on a shared Redis instance.
///
/// This is the production backend: every service instance coordinates
/// through the same Redis, so the single-flight guarantee holds across
/// processes and hosts.
pub struct RedisLockBackend {
    client: redis::Client,
}

impl RedisLockBackend {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    /// Connect from a Redis URL (e.g. `redis://127.0.0.1:6379`).
    pub fn from_url(url: &str) -> Result<Self, LockError> {
        let client = redis::Client::open(url).map_err(|e| LockError::Unreachable {
            reason: format!("invalid redis url: {}", e),
        })?;
        Ok(Self::new(client))
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, LockError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LockError::Unreachable {
                reason: format!("redis connection failed: {}", e),
            })
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn try_set(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;

        // SET key token NX PX ttl-ms: set only if absent, with expiry.
        let result: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Unreachable {
                reason: format!("redis SET failed: {}", e),
            })?;

        Ok(result.is_some())
    }

    async fn ttl_remaining(&self, name: &str) -> Result<Option<Duration>, LockError> {
        let mut conn = self.connection().await?;

        let pttl_ms: i64 = redis::cmd("PTTL")
            .arg(name)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Unreachable {
                reason: format!("redis PTTL failed: {}", e),
            })?;

        // -2: key does not exist, -1: key exists without expiry. A lock
        // without expiry should not happen; treat it as held indefinitely.
        match pttl_ms {
            -2 => Ok(None),
            -1 => Ok(Some(Duration::MAX)),
            ms => Ok(Some(Duration::from_millis(ms.max(0) as u64))),
        }
    }

    async fn compare_and_delete(&self, name: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;

        let deleted: i32 = UNLOCK_SCRIPT
            .key(name)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::ScriptFailed {
                reason: format!("redis unlock script failed: {}", e),
            })?;

        Ok(deleted == 1)
    }
}

impl std::fmt::Debug for RedisLockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockBackend").finish()
    }
}
