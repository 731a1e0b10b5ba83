use std::collections::HashSet;
use std::time::Duration;

use crawlguard_core::error::StoreError;
use crawlguard_core::traits::KeyValueStore;
use redis::aio::ConnectionManager;
use redis::{Cmd, RedisError};

use crate::config::RedisConfig;

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 500;

/// [`KeyValueStore`] backed by Redis.
///
/// Wraps a [`ConnectionManager`], which multiplexes one connection and
/// reconnects on failure. Clones share that connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect with the given configuration, bounded by its connect timeout.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| StoreError::Connection(format!("Invalid Redis URL: {e}")))?;

        let conn = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                StoreError::Connection(format!(
                    "Timed out connecting to Redis after {}ms",
                    config.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| StoreError::Connection(format!("Failed to connect: {e}")))?;

        tracing::info!("Connected to Redis");
        Ok(Self { conn })
    }

    /// Create a `RedisStore` from an existing connection (useful for testing).
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let _: String = self.query("PING", &redis::cmd("PING")).await?;
        Ok(())
    }

    async fn query<T: redis::FromRedisValue>(
        &self,
        op: &'static str,
        cmd: &Cmd,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(op, e))
    }
}

fn map_redis_error(op: &'static str, e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
    {
        StoreError::Connection(format!("{op}: {e}"))
    } else {
        StoreError::command(op, e)
    }
}

/// Redis rejects `PX 0`; sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl KeyValueStore for RedisStore {
    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = self.query("SET NX", &cmd).await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.query("GET", redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: String = self.query("SET", &cmd).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed: i64 = self.query("DEL", redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let count: i64 = self.query("EXISTS", redis::cmd("EXISTS").arg(key)).await?;
        Ok(count > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let updated: i64 = self
            .query("PEXPIRE", redis::cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)))
            .await?;
        Ok(updated == 1)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<HashSet<String>, StoreError> {
        let mut keys = HashSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .query(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        tracing::debug!(%pattern, matched = keys.len(), "Scanned keys");
        Ok(keys)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let added: i64 = self
            .query("SADD", redis::cmd("SADD").arg(key).arg(member))
            .await?;
        Ok(added == 1)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let present: i64 = self
            .query("SISMEMBER", redis::cmd("SISMEMBER").arg(key).arg(member))
            .await?;
        Ok(present == 1)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let removed: i64 = self
            .query("SREM", redis::cmd("SREM").arg(key).arg(member))
            .await?;
        Ok(removed == 1)
    }

    async fn set_size(&self, key: &str) -> Result<u64, StoreError> {
        self.query("SCARD", redis::cmd("SCARD").arg(key)).await
    }

    async fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        self.query("SMEMBERS", redis::cmd("SMEMBERS").arg(key)).await
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        self.query("INCRBY", redis::cmd("INCRBY").arg(key).arg(by))
            .await
    }
}
