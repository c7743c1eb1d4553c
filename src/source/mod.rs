//! Data source capability.
//!
//! A data source is anything that can hand the slicer raw array data for one
//! index description: dense images, label volumes, point overlays, or
//! pyramids of any of these.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              AsyncSlicer                │
//! │    (worker tasks call `slice()`)        │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           DataSource Trait              │
//! │  (ndim, extent, level_count, slice)     │
//! └────────────────────┬────────────────────┘
//!                      │
//!          ┌───────────┼───────────┐
//!          ▼           ▼           ▼
//! ┌──────────────┐ ┌────────────┐ ┌──────────────┐
//! │ ArraySource  │ │PointsSource│ │ Throttled<S> │
//! │(images/labels│ │ (overlays) │ │ (adds delay) │
//! │  + pyramids) │ │            │ │              │
//! └──────────────┘ └────────────┘ └──────────────┘
//! ```
//!
//! # Concurrency Contract
//!
//! `slice()` may be slow and will be called concurrently from several worker
//! tasks. Implementations must be safe for concurrent reads; the slicer does
//! not serialise calls to the same source.

mod array;
mod data;
mod points;
mod throttled;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

pub use array::ArraySource;
pub use data::{ArrayData, DType, Element};
pub use points::PointsSource;
pub use throttled::Throttled;

// =============================================================================
// Source Kind
// =============================================================================

/// The kind of data a source provides.
///
/// Image and label slices get thumbnails; point slices are coordinate lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Image,
    Labels,
    Points,
}

impl SourceKind {
    /// Whether slices of this kind can be rendered as a thumbnail.
    pub fn has_thumbnail(self) -> bool {
        matches!(self, SourceKind::Image | SourceKind::Labels)
    }
}

// =============================================================================
// Slice Index
// =============================================================================

/// Index that selects one slice of a source.
///
/// Axes are expressed in the source's own dimensionality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SliceIndex {
    /// Resolution level (0 = full resolution)
    pub level: usize,

    /// One coordinate per non-displayed axis, in ascending axis order.
    ///
    /// Coordinates are level-0 indices; sources map them to coarser levels.
    pub point: Vec<usize>,

    /// Axes spanned by the slice, in output order
    pub displayed_axes: Vec<usize>,
}

impl SliceIndex {
    pub fn new(level: usize, point: Vec<usize>, displayed_axes: Vec<usize>) -> Self {
        Self {
            level,
            point,
            displayed_axes,
        }
    }

    /// Non-displayed axes of an `ndim`-dimensional source, ascending.
    pub fn sliced_axes(&self, ndim: usize) -> Vec<usize> {
        (0..ndim)
            .filter(|axis| !self.displayed_axes.contains(axis))
            .collect()
    }

    /// Pair every non-displayed axis with its point coordinate.
    pub fn fixed_axes(&self, ndim: usize) -> Result<Vec<(usize, usize)>, SourceError> {
        if self.displayed_axes.iter().any(|&axis| axis >= ndim) {
            return Err(SourceError::InvalidIndex(format!(
                "displayed axes {:?} exceed {} dimensions",
                self.displayed_axes, ndim
            )));
        }
        let sliced = self.sliced_axes(ndim);
        if sliced.len() != self.point.len() {
            return Err(SourceError::InvalidIndex(format!(
                "point {:?} does not match {} non-displayed axes",
                self.point,
                sliced.len()
            )));
        }
        Ok(sliced.into_iter().zip(self.point.iter().copied()).collect())
    }
}

// =============================================================================
// DataSource Trait
// =============================================================================

/// Capability interface for everything the slicer can slice.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Kind of data this source provides.
    fn kind(&self) -> SourceKind {
        SourceKind::Image
    }

    /// Number of dimensions.
    fn ndim(&self) -> usize;

    /// Inclusive `(min, max)` index range along `axis` at level 0.
    ///
    /// Returns `None` if `axis` is not below `ndim()`.
    fn extent(&self, axis: usize) -> Option<(usize, usize)>;

    /// Number of resolution levels (1 if not pyramidal).
    fn level_count(&self) -> usize {
        1
    }

    /// Produce the slice described by `index`.
    async fn slice(&self, index: &SliceIndex) -> Result<ArrayData, SourceError>;

    /// Whether [`DataSource::cancel`] does anything useful.
    fn supports_cancel(&self) -> bool {
        false
    }

    /// Hint that a previously requested slice is no longer needed.
    fn cancel(&self, _index: &SliceIndex) {}
}
