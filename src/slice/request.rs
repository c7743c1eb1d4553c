//! Slice requests, responses and failures.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::ErrorKind;
use crate::source::{ArrayData, SliceIndex};

use super::cache::SliceCacheKey;
use super::thumbnail::Thumbnail;

// =============================================================================
// Layer Identifier
// =============================================================================

/// Source of layer identifiers for every slicer in the process.
static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque layer identity.
///
/// Identifiers come from one process-wide counter and are never reused, so a
/// late completion can never be mistaken for a newer layer's result and
/// slicers sharing a cache never collide on its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LayerId(u64);

impl LayerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocate a fresh identifier.
    pub(crate) fn next() -> Self {
        Self(NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

// =============================================================================
// Slice Request
// =============================================================================

/// One slicing request for one layer.
///
/// `version` is the layer's request counter at construction time; no two
/// requests for the same layer share a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRequest {
    pub layer_id: LayerId,
    pub version: u64,
    pub index: SliceIndex,
}

impl SliceRequest {
    pub fn new(layer_id: LayerId, version: u64, index: SliceIndex) -> Self {
        Self {
            layer_id,
            version,
            index,
        }
    }

    /// Key under which the result of this request is cached.
    pub fn cache_key(&self) -> SliceCacheKey {
        SliceCacheKey::new(self.layer_id, &self.index)
    }
}

// =============================================================================
// Slice Data
// =============================================================================

/// A computed slice as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceData {
    pub data: ArrayData,
    pub thumbnail: Option<Thumbnail>,
}

impl SliceData {
    pub fn new(data: ArrayData, thumbnail: Option<Thumbnail>) -> Self {
        Self { data, thumbnail }
    }

    /// Memory footprint of the slice and its thumbnail.
    pub fn nbytes(&self) -> usize {
        self.data.nbytes() + self.thumbnail.as_ref().map_or(0, Thumbnail::nbytes)
    }
}

// =============================================================================
// Slice Response / Failure
// =============================================================================

/// A slice accepted for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceResponse {
    pub layer_id: LayerId,

    /// Request version this response answers
    pub version: u64,

    pub data: ArrayData,

    pub thumbnail: Option<Thumbnail>,

    /// Whether the slice was served from the cache
    pub cache_hit: bool,
}

impl SliceResponse {
    pub(crate) fn new(layer_id: LayerId, version: u64, slice: SliceData, cache_hit: bool) -> Self {
        Self {
            layer_id,
            version,
            data: slice.data,
            thumbnail: slice.thumbnail,
            cache_hit,
        }
    }
}

/// A request that failed inside its data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SliceFailure {
    pub layer_id: LayerId,
    pub version: u64,
    pub kind: ErrorKind,
    pub message: String,
}

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceEvent {
    Ready(SliceResponse),
    Failed(SliceFailure),
}

impl SliceEvent {
    pub fn layer_id(&self) -> LayerId {
        match self {
            SliceEvent::Ready(response) => response.layer_id,
            SliceEvent::Failed(failure) => failure.layer_id,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            SliceEvent::Ready(response) => response.version,
            SliceEvent::Failed(failure) => failure.version,
        }
    }

    /// The response, if this is a ready event.
    pub fn response(&self) -> Option<&SliceResponse> {
        match self {
            SliceEvent::Ready(response) => Some(response),
            SliceEvent::Failed(_) => None,
        }
    }
}
