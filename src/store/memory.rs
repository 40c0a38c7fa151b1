//! In-process store with Redis-compatible semantics.
//!
//! Used by unit and flow tests, and by `--memory` dry runs of the CLI. Supports
//! key expiry, FIFO lists and score-ordered sets, plus failure injection so
//! tests can simulate an unreachable store or a failing index write.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ordered_float::OrderedFloat;

use super::Store;
use crate::error::StoreError;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    by_score: BTreeSet<(OrderedFloat<f64>, String)>,
    scores: HashMap<String, OrderedFloat<f64>>,
}

impl SortedSet {
    fn insert(&mut self, score: f64, member: &str) {
        let score = OrderedFloat(score);
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.by_score.remove(&(previous, member.to_string()));
        }
        self.by_score.insert((score, member.to_string()));
    }

    fn in_range(&self, min: f64, max: f64) -> impl Iterator<Item = &(OrderedFloat<f64>, String)> {
        self.by_score
            .iter()
            .filter(move |(score, _)| score.0 >= min && score.0 <= max)
    }
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
    sorted: HashMap<String, SortedSet>,
}

/// In-memory [`Store`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    fail_sorted_set_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `zadd` fail while leaving every other operation intact.
    pub fn fail_sorted_set_writes(&self, fail: bool) {
        self.fail_sorted_set_writes.store(fail, Ordering::SeqCst);
    }

    /// Forces a key to expire immediately.
    pub fn expire_now(&self, key: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.values.remove(key);
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> Result<T, StoreError> {
        self.check()?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        self.with_state(|state| {
            state
                .values
                .get(key)
                .filter(|entry| entry.is_live(now))
                .map(|entry| entry.value.clone())
        })
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let now = Instant::now();
        self.with_state(|state| {
            keys.iter()
                .map(|key| {
                    state
                        .values
                        .get(key)
                        .filter(|entry| entry.is_live(now))
                        .map(|entry| entry.value.clone())
                })
                .collect()
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.with_state(|state| {
            state.values.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        self.with_state(|state| state.values.get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn push(&self, list: &str, value: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .lists
                .entry(list.to_string())
                .or_default()
                .push_back(value.to_string());
        })
    }

    async fn pop(&self, list: &str) -> Result<Option<String>, StoreError> {
        self.with_state(|state| state.lists.get_mut(list).and_then(|l| l.pop_front()))
    }

    async fn len(&self, list: &str) -> Result<u64, StoreError> {
        self.with_state(|state| state.lists.get(list).map_or(0, |l| l.len() as u64))
    }

    async fn zadd(&self, set: &str, score: f64, member: &str) -> Result<(), StoreError> {
        if self.fail_sorted_set_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "sorted set writes disabled".to_string(),
            ));
        }
        self.with_state(|state| {
            state
                .sorted
                .entry(set.to_string())
                .or_default()
                .insert(score, member);
        })
    }

    async fn zrevrange(
        &self,
        set: &str,
        start: u64,
        stop: u64,
    ) -> Result<Vec<String>, StoreError> {
        self.with_state(|state| {
            let Some(sorted) = state.sorted.get(set) else {
                return Vec::new();
            };
            if stop < start {
                return Vec::new();
            }
            let skip = usize::try_from(start).unwrap_or(usize::MAX);
            let take = usize::try_from((stop - start).saturating_add(1)).unwrap_or(usize::MAX);
            sorted
                .by_score
                .iter()
                .rev()
                .skip(skip)
                .take(take)
                .map(|(_, member)| member.clone())
                .collect()
        })
    }

    async fn zcard(&self, set: &str) -> Result<u64, StoreError> {
        self.with_state(|state| state.sorted.get(set).map_or(0, |s| s.scores.len() as u64))
    }

    async fn zcount(&self, set: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        self.with_state(|state| {
            state
                .sorted
                .get(set)
                .map_or(0, |s| s.in_range(min, max).count() as u64)
        })
    }

    async fn zremrangebyscore(&self, set: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        self.with_state(|state| {
            let Some(sorted) = state.sorted.get_mut(set) else {
                return 0;
            };
            let doomed: Vec<(OrderedFloat<f64>, String)> =
                sorted.in_range(min, max).cloned().collect();
            for entry in &doomed {
                sorted.by_score.remove(entry);
                sorted.scores.remove(&entry.1);
            }
            doomed.len() as u64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();
        store
            .set("b", "2", Some(Duration::from_millis(10)))
            .await
            .unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.exists("b").await.unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("b").await.unwrap().is_none());
        assert!(!store.exists("b").await.unwrap());

        let many = store
            .get_many(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(many, vec![Some("1".to_string()), None]);
    }

    #[tokio::test]
    async fn test_list_is_fifo() {
        let store = MemoryStore::new();
        store.push("q", "first").await.unwrap();
        store.push("q", "second").await.unwrap();
        assert_eq!(store.len("q").await.unwrap(), 2);
        assert_eq!(store.pop("q").await.unwrap().as_deref(), Some("first"));
        assert_eq!(store.pop("q").await.unwrap().as_deref(), Some("second"));
        assert!(store.pop("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sorted_set_ordering_and_ranges() {
        let store = MemoryStore::new();
        store.zadd("idx", 10.0, "old").await.unwrap();
        store.zadd("idx", 30.0, "new").await.unwrap();
        store.zadd("idx", 20.0, "mid").await.unwrap();
        // Re-adding updates the score rather than duplicating.
        store.zadd("idx", 5.0, "old").await.unwrap();

        assert_eq!(store.zcard("idx").await.unwrap(), 3);
        assert_eq!(
            store.zrevrange("idx", 0, 1).await.unwrap(),
            vec!["new".to_string(), "mid".to_string()]
        );
        assert_eq!(store.zcount("idx", 6.0, f64::INFINITY).await.unwrap(), 2);
        assert_eq!(store.zremrangebyscore("idx", f64::NEG_INFINITY, 20.0).await.unwrap(), 2);
        assert_eq!(store.zrevrange("idx", 0, 10).await.unwrap(), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.fail_sorted_set_writes(true);
        assert!(store.zadd("idx", 1.0, "x").await.is_err());
        assert!(store.set("k", "v", None).await.is_ok());

        store.set_unavailable(true);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store.get("k").await.is_err());
    }
}
