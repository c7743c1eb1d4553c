//! Slice cache for computed slices.
//!
//! This module provides a bounded LRU cache of computed slices so that
//! scrubbing back over already-seen positions never re-invokes a data source.
//!
//! # Cache Key
//!
//! Slices are cached by a composite key including:
//! - Layer identity
//! - Resolution level
//! - Point tuple (one coordinate per non-displayed axis)
//! - Displayed axes, in display order
//!
//! # Capacity
//!
//! The cache is bounded either by entry count or by total bytes. With a byte
//! bound, the least-recently-used entries are evicted until the new entry
//! fits; an entry larger than the whole budget is not cached. Reads and
//! writes both count as a touch.

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::ConfigError;
use crate::source::SliceIndex;

use super::request::{LayerId, SliceData};

/// Default cache capacity: 256 slices
pub const DEFAULT_SLICE_CACHE_ENTRIES: usize = 256;

// =============================================================================
// Capacity
// =============================================================================

/// Bound applied to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCapacity {
    /// At most this many slices
    Entries(usize),
    /// At most this many bytes of slice data
    Bytes(usize),
}

impl CacheCapacity {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            CacheCapacity::Entries(0) | CacheCapacity::Bytes(0) => Err(ConfigError::ZeroCapacity),
            _ => Ok(()),
        }
    }
}

impl Default for CacheCapacity {
    fn default() -> Self {
        CacheCapacity::Entries(DEFAULT_SLICE_CACHE_ENTRIES)
    }
}

// =============================================================================
// Cache Key
// =============================================================================

/// Cache key for computed slices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SliceCacheKey {
    pub layer_id: LayerId,
    pub level: usize,
    pub point: Vec<usize>,
    pub displayed_axes: Vec<usize>,
}

impl SliceCacheKey {
    pub fn new(layer_id: LayerId, index: &SliceIndex) -> Self {
        Self {
            layer_id,
            level: index.level,
            point: index.point.clone(),
            displayed_axes: index.displayed_axes.clone(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

// =============================================================================
// Slice Cache
// =============================================================================

struct CacheInner {
    lru: LruCache<SliceCacheKey, SliceData>,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn evict_lru(&mut self) -> bool {
        match self.lru.pop_lru() {
            Some((key, evicted)) => {
                trace!(layer = %key.layer_id, point = ?key.point, "evicted slice");
                self.bytes = self.bytes.saturating_sub(evicted.nbytes());
                self.evictions += 1;
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, key: &SliceCacheKey) -> Option<SliceData> {
        let removed = self.lru.pop(key)?;
        self.bytes = self.bytes.saturating_sub(removed.nbytes());
        Some(removed)
    }
}

/// Bounded LRU cache of computed slices.
///
/// # Thread Safety
///
/// All operations serialise on one internal lock that is held only for the
/// lookup or insert itself. The cache can be shared across engines via `Arc`.
///
/// # Example
///
/// ```
/// use slice_streamer::slice::{LayerId, SliceCache, SliceCacheKey, SliceData};
/// use slice_streamer::source::{ArrayData, SliceIndex};
///
/// #[tokio::main]
/// async fn main() {
///     let cache = SliceCache::with_max_entries(16).unwrap();
///
///     let key = SliceCacheKey::new(LayerId::new(0), &SliceIndex::new(0, vec![3], vec![1, 2]));
///     let data = ArrayData::from_fn(vec![2, 2], |idx| idx[1] as u8);
///     let slice = SliceData::new(data, None);
///
///     cache.put(key.clone(), slice.clone()).await;
///     assert_eq!(cache.get(&key).await, Some(slice));
/// }
/// ```
pub struct SliceCache {
    inner: Mutex<CacheInner>,
    capacity: CacheCapacity,
}

impl SliceCache {
    /// Create a cache with the given bound.
    ///
    /// A zero bound is a configuration error.
    pub fn new(capacity: CacheCapacity) -> Result<Self, ConfigError> {
        capacity.validate()?;
        let lru = match capacity {
            CacheCapacity::Entries(n) => {
                LruCache::new(NonZeroUsize::new(n).ok_or(ConfigError::ZeroCapacity)?)
            }
            CacheCapacity::Bytes(_) => LruCache::unbounded(),
        };
        Ok(Self {
            inner: Mutex::new(CacheInner {
                lru,
                bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            capacity,
        })
    }

    /// Create a cache holding at most `max_entries` slices.
    pub fn with_max_entries(max_entries: usize) -> Result<Self, ConfigError> {
        Self::new(CacheCapacity::Entries(max_entries))
    }

    /// Create a cache holding at most `max_bytes` of slice data.
    pub fn with_max_bytes(max_bytes: usize) -> Result<Self, ConfigError> {
        Self::new(CacheCapacity::Bytes(max_bytes))
    }

    /// Get a slice from the cache, marking it as recently used.
    pub async fn get(&self, key: &SliceCacheKey) -> Option<SliceData> {
        let mut inner = self.inner.lock().await;
        match inner.lru.get(key).cloned() {
            Some(slice) => {
                inner.hits += 1;
                Some(slice)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Check if a slice is cached without updating LRU order.
    pub async fn contains(&self, key: &SliceCacheKey) -> bool {
        let inner = self.inner.lock().await;
        inner.lru.contains(key)
    }

    /// Store a slice, evicting least-recently-used entries as needed.
    ///
    /// An existing entry for the same key is replaced (last writer wins).
    /// Returns `false` if the slice alone exceeds the byte budget, in which
    /// case nothing is stored and any previous entry for the key is dropped.
    pub async fn put(&self, key: SliceCacheKey, slice: SliceData) -> bool {
        let size = slice.nbytes();
        let mut inner = self.inner.lock().await;
        inner.remove(&key);

        match self.capacity {
            CacheCapacity::Entries(_) => {
                if let Some((evicted_key, evicted)) = inner.lru.push(key, slice) {
                    trace!(layer = %evicted_key.layer_id, point = ?evicted_key.point, "evicted slice");
                    inner.bytes = inner.bytes.saturating_sub(evicted.nbytes());
                    inner.evictions += 1;
                }
            }
            CacheCapacity::Bytes(max_bytes) => {
                if size > max_bytes {
                    trace!(size, max_bytes, "slice larger than cache budget, not cached");
                    return false;
                }
                while inner.bytes + size > max_bytes && inner.evict_lru() {}
                inner.lru.put(key, slice);
            }
        }

        inner.bytes += size;
        true
    }

    /// Remove a slice from the cache.
    pub async fn remove(&self, key: &SliceCacheKey) -> Option<SliceData> {
        let mut inner = self.inner.lock().await;
        inner.remove(key)
    }

    /// Remove every slice belonging to `layer_id`.
    ///
    /// Returns the number of removed entries.
    pub async fn invalidate(&self, layer_id: LayerId) -> usize {
        let mut inner = self.inner.lock().await;
        let keys: Vec<SliceCacheKey> = inner
            .lru
            .iter()
            .filter(|(key, _)| key.layer_id == layer_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            inner.remove(key);
        }
        keys.len()
    }

    /// Clear all entries from the cache.
    pub async fn invalidate_all(&self) {
        let mut inner = self.inner.lock().await;
        inner.lru.clear();
        inner.bytes = 0;
    }

    /// Get the current number of cached slices.
    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.lru.is_empty()
    }

    /// Get the current total size of cached slices in bytes.
    pub async fn size(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.bytes
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.lru.len(),
            bytes: inner.bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    pub fn capacity(&self) -> CacheCapacity {
        self.capacity
    }
}

// =============================================================================
// Tests
// =============================================================================
