//! Layer state on the control side of the slicer.
//!
//! A layer owns its data source, its geometry and its request counter. Layers
//! never hold references into the cache; results are looked up by key.
//!
//! # Axis Alignment
//!
//! A layer with `k` dimensions is aligned with the *last* `k` global axes:
//! layer axis `j` corresponds to global axis `ndim - k + j`. Global axes the
//! layer does not have are ignored, and layer axes missing from the global
//! Dims sit at their minimum.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::dims::Dims;
use crate::error::EngineError;
use crate::source::{DataSource, SliceIndex};

use super::request::{LayerId, SliceRequest};

// =============================================================================
// Layer Status
// =============================================================================

/// Last known outcome for a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LayerStatus {
    /// No request has completed yet
    Pending,
    /// The slice for `version` was accepted
    Ready { version: u64 },
    /// The request `version` failed inside the source
    Failed { version: u64, message: String },
    /// The source is unreachable; cleared by the next successful request
    Unavailable { message: String },
}

// =============================================================================
// Request Counter
// =============================================================================

/// Per-layer request counter shared with worker tasks.
///
/// Only the control context advances it; workers read it to detect that
/// their request was superseded.
#[derive(Debug)]
pub(crate) struct RequestCounter {
    latest: AtomicU64,
}

impl RequestCounter {
    pub(crate) fn new() -> Self {
        Self {
            latest: AtomicU64::new(0),
        }
    }

    /// Issue the next version.
    pub(crate) fn advance(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Highest version issued so far.
    pub(crate) fn latest(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// Shape information read from a source when the layer is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerGeometry {
    /// Inclusive index range per layer axis
    pub extents: Vec<(usize, usize)>,
    pub level_count: usize,
}

impl LayerGeometry {
    /// Read and validate the geometry of `source`.
    pub fn of(source: &dyn DataSource) -> Result<Self, EngineError> {
        let ndim = source.ndim();
        if ndim == 0 {
            return Err(EngineError::InvalidLayer {
                reason: "source has no dimensions".to_string(),
            });
        }

        let mut extents = Vec::with_capacity(ndim);
        for axis in 0..ndim {
            let (min, max) = source.extent(axis).ok_or_else(|| EngineError::InvalidLayer {
                reason: format!("source reports no extent for axis {}", axis),
            })?;
            if min > max {
                return Err(EngineError::InvalidLayer {
                    reason: format!("axis {} has empty extent [{}, {}]", axis, min, max),
                });
            }
            extents.push((min, max));
        }

        let level_count = source.level_count();
        if level_count == 0 {
            return Err(EngineError::InvalidLayer {
                reason: "source reports zero resolution levels".to_string(),
            });
        }

        Ok(Self {
            extents,
            level_count,
        })
    }

    pub fn ndim(&self) -> usize {
        self.extents.len()
    }

    /// Derive this layer's slice index from the global Dims.
    pub fn map_dims(&self, dims: &Dims) -> SliceIndex {
        let layer_ndim = self.ndim() as isize;
        let offset = dims.ndim() as isize - layer_ndim;

        let displayed_axes: Vec<usize> = dims
            .displayed_axes()
            .iter()
            .map(|&axis| axis as isize - offset)
            .filter(|axis| (0..layer_ndim).contains(axis))
            .map(|axis| axis as usize)
            .collect();

        let point = (0..self.ndim())
            .filter(|axis| !displayed_axes.contains(axis))
            .map(|axis| {
                let (min, max) = self.extents[axis];
                let global = axis as isize + offset;
                if global < 0 {
                    min
                } else {
                    dims.point()[global as usize].clamp(min, max)
                }
            })
            .collect();

        let level = dims.level().min(self.level_count - 1);

        SliceIndex::new(level, point, displayed_axes)
    }
}

// =============================================================================
// Layer
// =============================================================================

/// Record of the request currently being computed for a layer.
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub(crate) version: u64,
    pub(crate) index: SliceIndex,
}

/// A registered layer.
///
/// At most one job per layer is submitted to the pool at a time. Requests
/// issued while it runs wait in a single `pending` slot, newest wins.
pub(crate) struct Layer {
    pub(crate) id: LayerId,
    pub(crate) source: Arc<dyn DataSource>,
    pub(crate) geometry: LayerGeometry,
    pub(crate) counter: Arc<RequestCounter>,
    /// Latest request that has not completed yet
    pub(crate) in_flight: Option<InFlight>,
    /// Version of the job currently submitted to the pool
    pub(crate) running: Option<u64>,
    pub(crate) pending: Option<SliceRequest>,
    pub(crate) status: LayerStatus,
}

impl Layer {
    pub(crate) fn new(id: LayerId, source: Arc<dyn DataSource>) -> Result<Self, EngineError> {
        let geometry = LayerGeometry::of(source.as_ref())?;
        Ok(Self {
            id,
            source,
            geometry,
            counter: Arc::new(RequestCounter::new()),
            in_flight: None,
            running: None,
            pending: None,
            status: LayerStatus::Pending,
        })
    }
}
