//! Per-chain scan lock backed by Redis.
//!
//! Acquisition is a single `SET key token NX EX ttl`: it either succeeds
//! immediately or reports the lock as taken. The TTL is only a ceiling for
//! crashed workers; a healthy run always releases its own lock.
//!
//! Release deletes the key only if it still holds our token, so a run that
//! outlived its TTL cannot drop a lock now owned by another worker.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use curbside_common::error::AppError;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Name of the lock serialising scans of one chain.
pub fn chain_scan_lock_key(chain_id: Uuid) -> String {
    format!("lock:chain_scan:{}", chain_id)
}

/// Proof of ownership for an acquired lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub value: String,
}

/// A named, expiring, non-blocking lock.
#[async_trait]
pub trait ChainLock: Send + Sync {
    /// Try once to take `key` for at most `ttl`. `None` means someone else holds it.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, AppError>;

    /// Give up a lock previously returned by `try_acquire`.
    async fn release(&self, token: LockToken) -> Result<(), AppError>;
}

/// Redis implementation of `ChainLock`.
#[derive(Clone)]
pub struct RedisChainLock {
    redis: ConnectionManager,
}

impl RedisChainLock {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl ChainLock for RedisChainLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, AppError> {
        let mut conn = self.redis.clone();
        let value = Uuid::new_v4().to_string();

        // SET key token NX EX ttl
        // Returns Some("OK") if the key was set, None if it already exists
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        if result.is_none() {
            tracing::debug!(key, "Lock already held");
            return Ok(None);
        }

        Ok(Some(LockToken {
            key: key.to_string(),
            value,
        }))
    }

    async fn release(&self, token: LockToken) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        let script = redis::Script::new(RELEASE_SCRIPT);

        let deleted: i64 = script
            .key(&token.key)
            .arg(&token.value)
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            tracing::warn!(
                key = %token.key,
                "Lock had already expired or changed owner before release"
            );
        }

        Ok(())
    }
}
