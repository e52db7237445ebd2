//! Read-through entity cache on [`moka`].
//!
//! Remote reads are served from here while fresh. Writes that go through the
//! driver invalidate the keys they touch; bulk expiry drops everything, since
//! the driver cannot know which uuids the service removed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use strata_core::Entity;
use tracing::debug;

// ── cache stats ──────────────────────────────────────────────────────

/// Hit and miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate between 0.0 and 1.0; 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── cache ────────────────────────────────────────────────────────────

/// Entities keyed by uuid, evicted by TTL and capacity.
pub struct ReadCache<E: Entity> {
    inner: Cache<String, E>,
    stats: Arc<CacheStats>,
}

impl<E: Entity> Clone for ReadCache<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<E: Entity> ReadCache<E> {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        debug!(max_capacity, ttl_secs = ttl.as_secs(), "read cache created");
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub async fn get(&self, uuid: &str) -> Option<E> {
        match self.inner.get(uuid).await {
            Some(entity) => {
                self.stats.record_hit();
                Some(entity)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    pub async fn insert(&self, entity: E) {
        self.inner.insert(entity.uuid().to_owned(), entity).await;
    }

    pub async fn invalidate(&self, uuid: &str) {
        self.inner.invalidate(uuid).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
        debug!("read cache cleared");
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
