//! Processed-image cache.
//!
//! Cropping is the expensive step of the pipeline, and the list view asks for
//! the same result again every time a row scrolls back on screen. This module
//! keeps recent results in memory so repeat requests skip admission, downsample
//! and crop entirely.
//!
//! # Design
//!
//! ## Cache keys
//!
//! Entries are keyed by [`CacheKey`]: the image identity plus the crop
//! percentage value. Two percentages for the same image are independent
//! entries. The key carries no content hash, so every cached crop goes stale
//! the moment the global percentage changes; the view-model clears the whole
//! cache at that point rather than invalidating key by key.
//!
//! ## Bounds and eviction
//!
//! The cache is bounded two ways: by entry count (default 50) and by the sum
//! of estimated entry costs (default 100 MB, 4 bytes per pixel). Inserting an
//! entry that would break either bound evicts least-recently-used entries
//! first. A single entry larger than the whole cost budget is not stored.
//!
//! ## Concurrency
//!
//! All state sits behind one `parking_lot::Mutex`. Each call is linearizable,
//! but a lookup followed by a store is not atomic: two concurrent misses for
//! the same key both compute and the second store wins. Results for a fixed
//! key are identical, so this only costs duplicate work.

use crate::imaging::{CropPercentage, raster_memory_usage};
use crate::types::{ImageId, Raster};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Default maximum number of cached images.
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Default maximum aggregate cost in bytes (100 MB).
pub const DEFAULT_MAX_COST_BYTES: u64 = 100 * 1024 * 1024;

/// Lookup key: (image identity, crop percentage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub image: ImageId,
    pub crop: CropPercentage,
}

impl CacheKey {
    pub fn new(image: ImageId, crop: CropPercentage) -> Self {
        Self { image, crop }
    }
}

/// A cached image plus its estimated memory cost.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub image: Raster,
    pub cost: u64,
}

impl CachedEntry {
    pub fn new(image: Raster) -> Self {
        let cost = raster_memory_usage(&image);
        Self { image, cost }
    }
}

/// Cache bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_cost_bytes: u64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_cost_bytes: DEFAULT_MAX_COST_BYTES,
        }
    }
}

/// Summary of cache activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub entries: usize,
    pub cost_bytes: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} processed ({} total)",
                self.hits,
                self.misses,
                self.lookups()
            )?;
        } else {
            write!(f, "{} processed", self.misses)?;
        }
        if self.evictions > 0 {
            write!(f, ", {} evicted", self.evictions)?;
        }
        Ok(())
    }
}

struct Inner {
    entries: LruCache<CacheKey, CachedEntry>,
    total_cost: u64,
    stats: CacheStats,
}

impl Inner {
    fn sync_stats(&mut self) {
        self.stats.entries = self.entries.len();
        self.stats.cost_bytes = self.total_cost;
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CachedEntry> {
        let removed = self.entries.pop(key)?;
        self.total_cost = self.total_cost.saturating_sub(removed.cost);
        Some(removed)
    }
}

/// Bounded, thread-safe LRU store of processed images.
pub struct ImageCache {
    limits: CacheLimits,
    inner: Mutex<Inner>,
}

impl ImageCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner {
                // Count bound is enforced alongside the cost bound in `store`
                entries: LruCache::unbounded(),
                total_cost: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheLimits::default())
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Look up a cached image, refreshing its recency on hit.
    pub fn lookup(&self, image: ImageId, crop: CropPercentage) -> Option<Raster> {
        let key = CacheKey::new(image, crop);
        let mut inner = self.inner.lock();
        let hit = inner.entries.get(&key).map(|entry| entry.image.clone());
        match hit {
            Some(_) => inner.stats.hits += 1,
            None => inner.stats.misses += 1,
        }
        hit
    }

    /// Store an image, evicting least-recently-used entries to stay in bounds.
    ///
    /// Returns `false` if the image alone exceeds the cost budget (or the
    /// count bound is zero) and was not stored.
    pub fn store(&self, image: Raster, id: ImageId, crop: CropPercentage) -> bool {
        let key = CacheKey::new(id, crop);
        let entry = CachedEntry::new(image);

        if self.limits.max_entries == 0 || entry.cost > self.limits.max_cost_bytes {
            debug!(%id, cost = entry.cost, "entry exceeds cache bounds, not stored");
            return false;
        }

        let mut inner = self.inner.lock();
        inner.remove(&key);

        while !inner.entries.is_empty()
            && (inner.entries.len() + 1 > self.limits.max_entries
                || inner.total_cost + entry.cost > self.limits.max_cost_bytes)
        {
            if let Some((evicted_key, evicted)) = inner.entries.pop_lru() {
                inner.total_cost = inner.total_cost.saturating_sub(evicted.cost);
                inner.stats.evictions += 1;
                debug!(id = %evicted_key.image, cost = evicted.cost, "evicted cache entry");
            }
        }

        inner.total_cost += entry.cost;
        inner.entries.put(key, entry);
        inner.stats.insertions += 1;
        inner.sync_stats();
        true
    }

    /// Drop a single entry. Returns whether it was present.
    pub fn invalidate(&self, image: ImageId, crop: CropPercentage) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.remove(&CacheKey::new(image, crop)).is_some();
        inner.sync_stats();
        removed
    }

    /// Drop every entry. Statistics counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.total_cost = 0;
        inner.sync_stats();
        if dropped > 0 {
            debug!(dropped, "cleared image cache");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Current aggregate cost in bytes.
    pub fn total_cost(&self) -> u64 {
        self.inner.lock().total_cost
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ImageCache")
            .field("entries", &inner.entries.len())
            .field("total_cost", &inner.total_cost)
            .field("limits", &self.limits)
            .finish()
    }
}
