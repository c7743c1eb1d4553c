//! Slice cache integration tests.
//!
//! Tests verify:
//! - Cached slices are served without calling the source
//! - The cache honours its entry and byte bounds in LRU order
//! - Stored and returned slices are byte-for-byte identical
//! - Invalidation is scoped to one layer

use std::sync::Arc;

use slice_streamer::{
    ArrayData, CacheCapacity, LayerId, SliceCache, SliceCacheKey, SliceData, SliceEngine, SliceIndex,
    SlicerConfig,
};

use super::test_utils::{drain_ready, plane, volume, z_index, CountingSource};

fn key(layer: u64, z: usize) -> SliceCacheKey {
    SliceCacheKey::new(LayerId::new(layer), &z_index(z))
}

fn slice(z: usize) -> SliceData {
    SliceData::new(plane(z, 4), None)
}

// =============================================================================
// Cache Hits Through the Engine
// =============================================================================

#[tokio::test]
async fn test_cached_slice_skips_source() {
    let mut engine = SliceEngine::new(SlicerConfig::default().with_workers(2)).unwrap();
    let mut events = engine.subscribe();

    let source = CountingSource::new(volume(4, 4));
    engine.add_layer(Arc::new(source.clone())).await.unwrap();
    engine.run_until_idle().await;

    engine.set_point(0, 1).await.unwrap();
    engine.run_until_idle().await;
    assert_eq!(source.slice_count(), 2);

    // scrub back to an already seen plane
    engine.set_point(0, 0).await.unwrap();
    assert_eq!(engine.slicer().outstanding(), 0);
    assert_eq!(source.slice_count(), 2);

    let responses = drain_ready(&mut events);
    assert_eq!(responses.len(), 3);
    let back = &responses[2];
    assert!(back.cache_hit);
    assert_eq!(back.version, 3);
    assert_eq!(back.data, responses[0].data);
    assert_eq!(engine.stats().cache_hits, 1);
}

#[tokio::test]
async fn test_cache_shared_between_engines() {
    let cache = Arc::new(SliceCache::with_max_entries(16).unwrap());
    let config = SlicerConfig::default().with_workers(2);
    let mut first = SliceEngine::with_cache(config.clone(), cache.clone()).unwrap();
    let mut second = SliceEngine::with_cache(config, cache.clone()).unwrap();
    let mut first_events = first.subscribe();
    let mut second_events = second.subscribe();

    let a = first
        .add_layer(Arc::new(CountingSource::new(volume(2, 4))))
        .await
        .unwrap();
    first.run_until_idle().await;
    let zeros = ArrayData::from_fn(vec![2, 4, 4], |_| 0u16);
    let b = second
        .add_layer(Arc::new(CountingSource::new(zeros)))
        .await
        .unwrap();
    second.run_until_idle().await;

    // each engine sees its own data, nothing is shared across layers
    assert_ne!(a, b);
    let from_first = drain_ready(&mut first_events);
    let from_second = drain_ready(&mut second_events);
    assert_eq!(from_first[0].data, plane(0, 4));
    assert!(!from_second[0].cache_hit);
    assert_eq!(from_second[0].data, ArrayData::from_fn(vec![4, 4], |_| 0u16));
    assert_eq!(cache.len().await, 2);
    assert_eq!(second.stats().cache_hits, 0);

    // invalidating one engine's layer leaves the other's entries alone
    first.remove_layer(a).await.unwrap();
    assert_eq!(cache.len().await, 1);
    assert!(cache.contains(&key(b.as_u64(), 0)).await);

    second.refresh(b).await.unwrap();
    second.run_until_idle().await;
    assert_eq!(second.stats().dispatched, 2);
}

#[tokio::test]
async fn test_remove_layer_invalidates_only_its_entries() {
    let mut engine = SliceEngine::new(SlicerConfig::default().with_workers(2)).unwrap();
    let a = engine
        .add_layer(Arc::new(CountingSource::new(volume(3, 4))))
        .await
        .unwrap();
    let b = engine
        .add_layer(Arc::new(CountingSource::new(volume(3, 4))))
        .await
        .unwrap();
    engine.run_until_idle().await;
    engine.set_point(0, 1).await.unwrap();
    engine.run_until_idle().await;
    assert_eq!(engine.cache_stats().await.entries, 4);

    engine.remove_layer(a).await.unwrap();
    let cache = engine.slicer().cache();
    assert_eq!(cache.len().await, 2);
    assert!(cache.contains(&key(b.as_u64(), 0)).await);
    assert!(!cache.contains(&key(a.as_u64(), 0)).await);
}

// =============================================================================
// Capacity and Eviction
// =============================================================================

#[tokio::test]
async fn test_entry_bound_evicts_least_recently_used() {
    let cache = SliceCache::with_max_entries(3).unwrap();
    for z in 0..4 {
        cache.put(key(0, z), slice(z)).await;
    }

    assert_eq!(cache.len().await, 3);
    assert!(!cache.contains(&key(0, 0)).await);
    for z in 1..4 {
        assert!(cache.contains(&key(0, z)).await);
    }
    assert_eq!(cache.stats().await.evictions, 1);
}

#[tokio::test]
async fn test_get_refreshes_recency() {
    let cache = SliceCache::with_max_entries(3).unwrap();
    for z in 0..3 {
        cache.put(key(0, z), slice(z)).await;
    }

    // touch the oldest entry
    assert!(cache.get(&key(0, 0)).await.is_some());
    cache.put(key(0, 3), slice(3)).await;

    assert!(cache.contains(&key(0, 0)).await);
    assert!(!cache.contains(&key(0, 1)).await);
}

#[tokio::test]
async fn test_byte_bound_evicts_until_slice_fits() {
    // every 4x4 u16 plane is 32 bytes
    let cache = SliceCache::new(CacheCapacity::Bytes(100)).unwrap();
    for z in 0..3 {
        assert!(cache.put(key(0, z), slice(z)).await);
    }
    assert_eq!(cache.size().await, 96);

    cache.put(key(0, 3), slice(3)).await;
    assert_eq!(cache.len().await, 3);
    assert_eq!(cache.size().await, 96);
    assert!(!cache.contains(&key(0, 0)).await);

    // larger than the whole budget: not cached
    let big = SliceData::new(plane(0, 8), None);
    assert!(!cache.put(key(1, 0), big).await);
    assert!(!cache.contains(&key(1, 0)).await);
}

#[tokio::test]
async fn test_byte_bound_through_engine() {
    let config = SlicerConfig::default()
        .with_workers(2)
        .with_thumbnail_size(None)
        .with_cache(CacheCapacity::Bytes(64));
    let mut engine = SliceEngine::new(config).unwrap();
    engine
        .add_layer(Arc::new(CountingSource::new(volume(4, 4))))
        .await
        .unwrap();

    for z in 0..4 {
        engine.set_point(0, z).await.unwrap();
        engine.run_until_idle().await;
    }

    let stats = engine.cache_stats().await;
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.bytes, 64);
    assert_eq!(stats.evictions, 2);
}

#[test]
fn test_zero_capacity_is_rejected() {
    assert!(SliceCache::with_max_entries(0).is_err());
    assert!(SliceCache::with_max_bytes(0).is_err());
    assert!(SliceEngine::new(SlicerConfig::default().with_cache(CacheCapacity::Entries(0))).is_err());
}

// =============================================================================
// Content
// =============================================================================

#[tokio::test]
async fn test_get_returns_identical_bytes() {
    let cache = SliceCache::with_max_entries(4).unwrap();
    let stored = slice(2);
    cache.put(key(0, 2), stored.clone()).await;

    let first = cache.get(&key(0, 2)).await.unwrap();
    let second = cache.get(&key(0, 2)).await.unwrap();

    assert_eq!(first.data.bytes().as_ref(), stored.data.bytes().as_ref());
    assert_eq!(second, stored);
    assert_eq!(first.data.shape(), &[4, 4]);
}

#[tokio::test]
async fn test_keys_distinguish_level_and_axes() {
    let cache = SliceCache::with_max_entries(8).unwrap();
    let base = SliceIndex::new(0, vec![1], vec![1, 2]);
    let coarse = SliceIndex::new(1, vec![1], vec![1, 2]);
    let transposed = SliceIndex::new(0, vec![1], vec![2, 1]);

    cache.put(SliceCacheKey::new(LayerId::new(0), &base), slice(1)).await;

    assert!(!cache.contains(&SliceCacheKey::new(LayerId::new(0), &coarse)).await);
    assert!(!cache.contains(&SliceCacheKey::new(LayerId::new(0), &transposed)).await);
    assert!(!cache.contains(&SliceCacheKey::new(LayerId::new(1), &base)).await);
}

#[tokio::test]
async fn test_concurrent_access_respects_bound() {
    let cache = Arc::new(SliceCache::with_max_entries(8).unwrap());

    let mut handles = Vec::new();
    for layer in 0..4u64 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for z in 0..16 {
                cache.put(key(layer, z), slice(z % 4)).await;
                cache.get(&key(layer, z / 2)).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = cache.stats().await;
    assert_eq!(stats.entries, 8);
    assert_eq!(stats.bytes, 8 * 32);
    assert_eq!(stats.hits + stats.misses, 64);
}
