//! Key-value store adapter.
//!
//! Every other component talks to the shared store through the [`Store`]
//! trait. Two backends are provided:
//!
//! - [`RedisStore`]: the production backend, a Redis connection manager with
//!   a per-call timeout.
//! - [`MemoryStore`]: an in-process backend with the same semantics, used by
//!   tests and local dry runs.
//!
//! Each call is one round-trip and may fail independently. No atomicity is
//! implied across calls; the only atomic primitive callers rely on is
//! [`Store::pop`], which removes the head of a list for exactly one caller.

pub mod keys;
pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Operations required from the shared store.
///
/// Values are UTF-8 strings (JSON documents for records, ids for lists and
/// sorted sets).
#[async_trait]
pub trait Store: Send + Sync {
    /// Checks connectivity.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Reads a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Reads several values in one round-trip, preserving order.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Writes a value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Returns whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Appends a value to the tail of a list.
    async fn push(&self, list: &str, value: &str) -> Result<(), StoreError>;

    /// Atomically removes and returns the head of a list.
    async fn pop(&self, list: &str) -> Result<Option<String>, StoreError>;

    /// Returns the length of a list.
    async fn len(&self, list: &str) -> Result<u64, StoreError>;

    /// Inserts or updates a sorted-set member.
    async fn zadd(&self, set: &str, score: f64, member: &str) -> Result<(), StoreError>;

    /// Returns members by descending score, `start..=stop` inclusive.
    async fn zrevrange(&self, set: &str, start: u64, stop: u64)
        -> Result<Vec<String>, StoreError>;

    /// Returns the cardinality of a sorted set.
    async fn zcard(&self, set: &str) -> Result<u64, StoreError>;

    /// Counts members with `min <= score <= max`.
    async fn zcount(&self, set: &str, min: f64, max: f64) -> Result<u64, StoreError>;

    /// Removes members with `min <= score <= max`, returning how many went.
    async fn zremrangebyscore(&self, set: &str, min: f64, max: f64) -> Result<u64, StoreError>;
}
