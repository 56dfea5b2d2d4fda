//! In-memory LRU image cache bounded by decoded size.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;

/// Default fraction of the heap ceiling given to the memory cache.
pub const DEFAULT_HEAP_DIVISOR: u64 = 8;

/// Approximate decoded size of an image in KiB.
///
/// Row stride times height, rounded down, but never zero so that tiny images
/// still count against the budget.
#[must_use]
pub fn image_cost_kib(image: &image::DynamicImage) -> u64 {
    let bytes = image.as_bytes().len() as u64;
    (bytes / 1024).max(1)
}

/// Capacity in KiB for a heap ceiling and divisor.
#[must_use]
pub fn capacity_from_heap(heap_ceiling_bytes: u64, divisor: u64) -> u64 {
    heap_ceiling_bytes / divisor.max(1) / 1024
}

struct Entry {
    image: Arc<image::DynamicImage>,
    cost: u64,
}

struct Inner {
    entries: LruCache<CacheKey, Entry>,
    used_kib: u64,
}

/// In-memory LRU cache for decoded images.
/// Thread-safe; every operation takes a short, non-blocking lock.
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    capacity_kib: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache holding at most `capacity_kib` of decoded pixels.
    #[must_use]
    pub fn new(capacity_kib: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                used_kib: 0,
            }),
            capacity_kib,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache sized as a fraction of the given heap ceiling.
    #[must_use]
    pub fn with_heap_ceiling(heap_ceiling_bytes: u64, divisor: u64) -> Self {
        Self::new(capacity_from_heap(heap_ceiling_bytes, divisor))
    }

    /// Looks up an image, promoting it to most recently used on a hit.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(entry.image.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let inner = self.inner.lock();
        inner.entries.peek(key).map(|e| e.image.clone())
    }

    /// Returns true if the key is resident.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Stores an image unless the key is already present.
    ///
    /// The first writer wins: an existing entry keeps its value and its
    /// recency. Returns true if the image was inserted.
    pub fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>) -> bool {
        let cost = image_cost_kib(&image);
        let mut inner = self.inner.lock();

        if inner.entries.contains(&key) {
            trace!(key = %key, "Memory cache already holds key, keeping first value");
            return false;
        }

        if cost > self.capacity_kib {
            debug!(
                key = %key,
                cost_kib = cost,
                capacity_kib = self.capacity_kib,
                "Image larger than memory cache, not storing"
            );
            return false;
        }

        debug!(key = %key, cost_kib = cost, "Storing image in memory cache");
        inner.entries.put(key, Entry { image, cost });
        inner.used_kib += cost;

        while inner.used_kib > self.capacity_kib {
            let Some((evicted, entry)) = inner.entries.pop_lru() else {
                break;
            };
            inner.used_kib -= entry.cost;
            debug!(key = %evicted, cost_kib = entry.cost, "Evicted image from memory cache");
        }
        true
    }

    /// Removes an image from the cache.
    pub fn evict(&self, key: &CacheKey) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.pop(key) {
            inner.used_kib -= entry.cost;
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    /// Clears all images from the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.used_kib = 0;
        debug!("Cleared memory image cache");
    }

    /// Returns the number of cached images.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed cost of resident entries in KiB.
    pub fn used_kib(&self) -> u64 {
        self.inner.lock().used_kib
    }

    /// Returns the configured capacity in KiB.
    #[must_use]
    pub const fn capacity_kib(&self) -> u64 {
        self.capacity_kib
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
        let (size, used_kib) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.used_kib)
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            size,
            used_kib,
            capacity_kib: self.capacity_kib,
        }
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
    /// Summed entry cost in KiB.
    pub used_kib: u64,
    /// Capacity in KiB.
    pub capacity_kib: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {}/{} KiB, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.used_kib, self.capacity_kib, self.hit_rate, self.hits, self.misses
        )
    }
}
