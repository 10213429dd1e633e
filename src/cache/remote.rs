use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use super::CacheStore;
use crate::config::RedisConfig;

const SCAN_BATCH: usize = 500;

/// Cache store shared between workers through Redis.
///
/// Values are stored as JSON strings with `SET key value EX ttl`. Redis errors
/// and timeouts are logged and treated as a miss (or a skipped write), so a
/// broken cache never fails a request.
pub struct RedisCache {
    conn: ConnectionManager,
    namespace: String,
    timeout: Duration,
}

impl RedisCache {
    pub async fn connect(cfg: &RedisConfig, namespace: &str) -> anyhow::Result<Self> {
        tracing::debug!("Connecting to Redis at {}", cfg.dsn);
        let client = Client::open(cfg.dsn.as_str()).with_context(|| format!("Invalid Redis DSN {}", cfg.dsn))?;
        let conn = tokio::time::timeout(cfg.timeout(), ConnectionManager::new(client))
            .await
            .context("Timed out connecting to Redis")?
            .context("Failed to connect to Redis")?;

        Ok(Self {
            conn,
            namespace: namespace.to_string(),
            timeout: cfg.timeout(),
        })
    }

    /// Run one Redis operation under the configured timeout; failures are logged
    async fn bounded<T, Fut>(&self, op: &str, key: &str, fut: Fut) -> Option<T>
    where
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!("Redis {} {} failed: {}", op, key, e);
                None
            }
            Err(_) => {
                tracing::warn!("Redis {} {} timed out after {:?}", op, key, self.timeout);
                None
            }
        }
    }

    async fn delete_matching(&self, pattern: &str) -> redis::RedisResult<usize> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                deleted += keys.len();
                redis::cmd("DEL").arg(&keys).query_async::<()>(&mut conn).await?;
            }
            if next == 0 {
                return Ok(deleted);
            }
            cursor = next;
        }
    }
}

/// Every key this service writes starts with the namespace
fn clear_pattern(namespace: &str) -> String {
    format!("{}:*", namespace)
}

/// `EX` needs a positive number of seconds
fn expiry_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut conn = self.conn.clone();
        let raw: String = self.bounded("GET", key, async move { conn.get::<_, Option<String>>(key).await }).await??;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring non-JSON cache value at {}: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let mut conn = self.conn.clone();
        let payload = value.to_string();
        let write = async move {
            redis::cmd("SET")
                .arg(key)
                .arg(payload)
                .arg("EX")
                .arg(expiry_secs(ttl))
                .query_async::<()>(&mut conn)
                .await
        };
        self.bounded("SET", key, write).await;
    }

    async fn clear(&self) {
        let pattern = clear_pattern(&self.namespace);
        // SCAN over a large keyspace can take longer than a single command
        match self.delete_matching(&pattern).await {
            Ok(count) => tracing::info!("Cleared {} cached entries matching {}", count, pattern),
            Err(e) => tracing::warn!("Failed to clear Redis keys {}: {}", pattern, e),
        }
    }
}
