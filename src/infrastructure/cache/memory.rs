//! In-memory LRU cache tier, bounded by a byte budget.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, CachedImage};
use crate::domain::ports::ImageCachePort;

/// Default memory budget in bytes (32 MiB).
pub const DEFAULT_MEMORY_BUDGET: usize = 32 * 1024 * 1024;

/// In-memory LRU cache for decoded images.
///
/// Bounded by an explicit byte budget rather than an entry count: each
/// entry is charged its [`CachedImage::cost`], and inserts evict
/// least-recently-used entries until the total fits. All operations are
/// synchronous; mutation is serialized by an internal lock.
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    budget: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct Inner {
    entries: LruCache<CacheKey, Arc<CachedImage>>,
    cost: usize,
}

impl MemoryImageCache {
    /// Creates a cache with the given byte budget.
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                cost: 0,
            }),
            budget,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache with the default budget.
    #[must_use]
    pub fn with_default_budget() -> Self {
        Self::new(DEFAULT_MEMORY_BUDGET)
    }

    /// Total byte cost of the cached entries.
    #[must_use]
    pub fn cost(&self) -> usize {
        self.inner.lock().cost
    }

    /// The configured byte budget.
    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let inner = self.inner.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: inner.entries.len(),
            cost: inner.cost,
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_budget()
    }
}

impl ImageCachePort for MemoryImageCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<CachedImage>> {
        let mut inner = self.inner.lock();
        if let Some(image) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(image.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    fn put(&self, key: CacheKey, image: Arc<CachedImage>) {
        let mut inner = self.inner.lock();
        let added = image.cost();
        if let Some(replaced) = inner.entries.put(key, image) {
            inner.cost -= replaced.cost();
        }
        inner.cost += added;

        while inner.cost > self.budget {
            let Some((evicted_key, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            inner.cost -= evicted.cost();
            debug!(key = %evicted_key, "Evicted image over memory budget");
        }
    }

    fn evict(&self, key: &CacheKey) {
        let mut inner = self.inner.lock();
        if let Some(removed) = inner.entries.pop(key) {
            inner.cost -= removed.cost();
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.cost = 0;
        debug!("Cleared memory image cache");
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Total byte cost of the cached images.
    pub cost: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.cost, self.hit_rate, self.hits, self.misses
        )
    }
}
