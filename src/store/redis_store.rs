//! Redis-backed store.
//!
//! Uses a `ConnectionManager` (automatic reconnection) cloned per call, and
//! bounds every round-trip with a timeout so a wedged connection surfaces as
//! [`StoreError::Timeout`] instead of hanging the caller.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::Store;
use crate::error::StoreError;

/// Store adapter over a shared Redis server.
#[derive(Clone)]
pub struct RedisStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Upper bound for each round-trip.
    op_timeout: Duration,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the URL is invalid or the initial
    /// connection fails within `op_timeout`.
    pub async fn connect(redis_url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let redis = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout {
                op: "connect",
                after: op_timeout,
            })?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self { redis, op_timeout })
    }

    async fn timed<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(map_redis_error),
            Err(_) => Err(StoreError::Timeout {
                op,
                after: self.op_timeout,
            }),
        }
    }
}

fn map_redis_error(err: redis::RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Command(err)
    }
}

/// ZREVRANGE index; anything past `isize::MAX` means "to the end".
fn range_index(index: u64) -> isize {
    isize::try_from(index).unwrap_or(isize::MAX)
}

/// Formats a score for ZCOUNT/ZREMRANGEBYSCORE bounds.
fn score_bound(value: f64) -> String {
    if value == f64::INFINITY {
        "+inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        value.to_string()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let _: String = self
            .timed("ping", async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        self.timed("get", async move { conn.get(key).await }).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        self.timed("mget", async move {
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        self.timed("set", async move { cmd.query_async::<_, ()>(&mut conn).await })
            .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        self.timed("exists", async move { conn.exists(key).await })
            .await
    }

    async fn push(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        self.timed("rpush", async move { conn.rpush(list, value).await })
            .await
    }

    async fn pop(&self, list: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        self.timed("lpop", async move {
            redis::cmd("LPOP").arg(list).query_async(&mut conn).await
        })
        .await
    }

    async fn len(&self, list: &str) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        self.timed("llen", async move { conn.llen(list).await })
            .await
    }

    async fn zadd(&self, set: &str, score: f64, member: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        self.timed("zadd", async move { conn.zadd(set, member, score).await })
            .await
    }

    async fn zrevrange(
        &self,
        set: &str,
        start: u64,
        stop: u64,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.redis.clone();
        self.timed("zrevrange", async move {
            conn.zrevrange(set, range_index(start), range_index(stop))
                .await
        })
        .await
    }

    async fn zcard(&self, set: &str) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        self.timed("zcard", async move { conn.zcard(set).await })
            .await
    }

    async fn zcount(&self, set: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        let (min, max) = (score_bound(min), score_bound(max));
        self.timed("zcount", async move { conn.zcount(set, min, max).await })
            .await
    }

    async fn zremrangebyscore(&self, set: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        let (min, max) = (score_bound(min), score_bound(max));
        self.timed("zremrangebyscore", async move {
            conn.zrembyscore(set, min, max).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bound_formatting() {
        assert_eq!(score_bound(f64::INFINITY), "+inf");
        assert_eq!(score_bound(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_bound(1.5), "1.5");
    }

    #[test]
    fn test_range_index_never_goes_negative() {
        assert_eq!(range_index(0), 0);
        assert_eq!(range_index(42), 42);
        assert_eq!(range_index(u64::MAX), isize::MAX);
        assert_eq!(range_index(isize::MAX as u64 + 1), isize::MAX);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisStore::connect("not-a-url", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
