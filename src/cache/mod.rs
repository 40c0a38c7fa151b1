//! Explicit TTL cache for derived snapshots.
//!
//! A [`SnapshotCache`] owns one value, the instant it was generated and a
//! TTL. `get_or_refresh(now, refresh)` returns the held value while
//! `now - generated_at < ttl` and otherwise awaits `refresh`. Failed refreshes
//! are not cached. Callers pass `now`, so staleness is testable without
//! sleeping.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// How a cached read was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Refreshed,
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Hit)
    }
}

#[derive(Debug)]
struct Cached<T> {
    value: T,
    generated_at: Instant,
}

/// Single-value cache with an explicit staleness window.
#[derive(Debug)]
pub struct SnapshotCache<T> {
    ttl: Duration,
    slot: Mutex<Option<Cached<T>>>,
}

impl<T: Clone> SnapshotCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value if fresh at `now`, else recomputes it.
    ///
    /// The lock is held across the refresh, so concurrent callers that miss
    /// together trigger a single recomputation.
    pub async fn get_or_refresh<F, Fut, E>(
        &self,
        now: Instant,
        refresh: F,
    ) -> Result<(T, CacheOutcome), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            if now.saturating_duration_since(cached.generated_at) < self.ttl {
                return Ok((cached.value.clone(), CacheOutcome::Hit));
            }
        }

        let value = refresh().await?;
        *slot = Some(Cached {
            value: value.clone(),
            generated_at: now,
        });
        Ok((value, CacheOutcome::Refreshed))
    }

    /// Drops the held value so the next read refreshes.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
