//! Point overlay source.
//!
//! Slicing a point set keeps the points lying on the current plane (within
//! half an index of the point coordinate along every non-displayed axis) and
//! returns their displayed coordinates as an `(n, k)` `f64` array.

use async_trait::async_trait;

use crate::error::SourceError;

use super::data::ArrayData;
use super::{DataSource, SliceIndex, SourceKind};

/// Distance along a sliced axis within which a point counts as in-slice.
const SLICE_TOLERANCE: f64 = 0.5;

/// A set of N-dimensional points with non-negative coordinates.
#[derive(Debug, Clone)]
pub struct PointsSource {
    ndim: usize,
    coords: Vec<Vec<f64>>,
}

impl PointsSource {
    /// Create a point source; every point must have `ndim` finite,
    /// non-negative coordinates.
    pub fn new(ndim: usize, coords: Vec<Vec<f64>>) -> Result<Self, SourceError> {
        if ndim == 0 {
            return Err(SourceError::InvalidIndex(
                "points need at least one dimension".to_string(),
            ));
        }
        for (i, point) in coords.iter().enumerate() {
            if point.len() != ndim {
                return Err(SourceError::InvalidIndex(format!(
                    "point {} has {} coordinates, expected {}",
                    i,
                    point.len(),
                    ndim
                )));
            }
            if point.iter().any(|c| !c.is_finite() || *c < 0.0) {
                return Err(SourceError::InvalidIndex(format!(
                    "point {} has a negative or non-finite coordinate",
                    i
                )));
            }
        }
        Ok(Self { ndim, coords })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

#[async_trait]
impl DataSource for PointsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Points
    }

    fn ndim(&self) -> usize {
        self.ndim
    }

    fn extent(&self, axis: usize) -> Option<(usize, usize)> {
        if axis >= self.ndim {
            return None;
        }
        let (min, max) = self
            .coords
            .iter()
            .map(|point| point[axis])
            .fold((f64::INFINITY, 0.0f64), |(lo, hi), c| (lo.min(c), hi.max(c)));
        if self.coords.is_empty() {
            return Some((0, 0));
        }
        Some((min.floor() as usize, max.round() as usize))
    }

    async fn slice(&self, index: &SliceIndex) -> Result<ArrayData, SourceError> {
        if index.level != 0 {
            return Err(SourceError::InvalidIndex(format!(
                "points have a single level, got level {}",
                index.level
            )));
        }
        let fixed = index.fixed_axes(self.ndim)?;

        let mut values = Vec::new();
        let mut count = 0usize;
        for point in &self.coords {
            let in_slice = fixed
                .iter()
                .all(|&(axis, coord)| (point[axis] - coord as f64).abs() <= SLICE_TOLERANCE);
            if in_slice {
                values.extend(index.displayed_axes.iter().map(|&axis| point[axis]));
                count += 1;
            }
        }

        ArrayData::from_elements(vec![count, index.displayed_axes.len()], &values)
    }
}
