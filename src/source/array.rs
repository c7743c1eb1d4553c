//! In-memory dense array source.
//!
//! Backs image and label layers with one [`ArrayData`] per resolution level.
//! Level 0 is the full-resolution array; every further level is coarser along
//! at least one axis.

use async_trait::async_trait;

use crate::error::SourceError;

use super::data::ArrayData;
use super::{DataSource, SliceIndex, SourceKind};

/// Dense N-dimensional array held in memory, optionally pyramidal.
#[derive(Debug, Clone)]
pub struct ArraySource {
    kind: SourceKind,
    levels: Vec<ArrayData>,
}

impl ArraySource {
    /// Create a single-level image source.
    pub fn new(data: ArrayData) -> Result<Self, SourceError> {
        Self::multiscale(SourceKind::Image, vec![data])
    }

    /// Create a single-level label source.
    pub fn labels(data: ArrayData) -> Result<Self, SourceError> {
        Self::multiscale(SourceKind::Labels, vec![data])
    }

    /// Create a source from explicit resolution levels.
    ///
    /// All levels must share the dtype and dimensionality of level 0, and no
    /// level may be larger than the one before it along any axis.
    pub fn multiscale(kind: SourceKind, levels: Vec<ArrayData>) -> Result<Self, SourceError> {
        let base = levels
            .first()
            .ok_or_else(|| SourceError::InvalidIndex("no resolution levels given".to_string()))?;
        if base.ndim() == 0 || base.shape().contains(&0) {
            return Err(SourceError::InvalidIndex(format!(
                "cannot slice an array of shape {:?}",
                base.shape()
            )));
        }

        for (level, pair) in levels.windows(2).enumerate() {
            let (finer, coarser) = (&pair[0], &pair[1]);
            if coarser.dtype() != base.dtype() || coarser.ndim() != base.ndim() {
                return Err(SourceError::InvalidIndex(format!(
                    "level {} does not match dtype/ndim of level 0",
                    level + 1
                )));
            }
            let grows = coarser
                .shape()
                .iter()
                .zip(finer.shape())
                .any(|(c, f)| *c == 0 || c > f);
            if grows {
                return Err(SourceError::InvalidIndex(format!(
                    "level {} shape {:?} is not coarser than {:?}",
                    level + 1,
                    coarser.shape(),
                    finer.shape()
                )));
            }
        }

        Ok(Self { kind, levels })
    }

    /// Build a pyramid by halving the last two axes `level_count - 1` times.
    pub fn pyramid(kind: SourceKind, base: ArrayData, level_count: usize) -> Result<Self, SourceError> {
        let ndim = base.ndim();
        let mut factors = vec![1usize; ndim];
        for factor in factors.iter_mut().skip(ndim.saturating_sub(2)) {
            *factor = 2;
        }

        let mut levels = vec![base];
        while levels.len() < level_count.max(1) {
            let Some(previous) = levels.last() else {
                break;
            };
            let next = previous.downsample(&factors)?;
            levels.push(next);
        }
        Self::multiscale(kind, levels)
    }

    /// Array data of one level.
    pub fn level(&self, level: usize) -> Option<&ArrayData> {
        self.levels.get(level)
    }

    fn base(&self) -> &ArrayData {
        &self.levels[0]
    }
}

#[async_trait]
impl DataSource for ArraySource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn ndim(&self) -> usize {
        self.base().ndim()
    }

    fn extent(&self, axis: usize) -> Option<(usize, usize)> {
        self.base().shape().get(axis).map(|len| (0, len - 1))
    }

    fn level_count(&self) -> usize {
        self.levels.len()
    }

    async fn slice(&self, index: &SliceIndex) -> Result<ArrayData, SourceError> {
        let data = self.levels.get(index.level).ok_or_else(|| {
            SourceError::InvalidIndex(format!(
                "level {} out of range ({} levels)",
                index.level,
                self.levels.len()
            ))
        })?;
        let base_shape = self.base().shape();

        let mut fixed = index.fixed_axes(self.ndim())?;
        for (axis, coord) in fixed.iter_mut() {
            if *coord >= base_shape[*axis] {
                return Err(SourceError::InvalidIndex(format!(
                    "index {} out of bounds for axis {} of length {}",
                    coord, axis, base_shape[*axis]
                )));
            }
            // map level-0 coordinates onto the coarser grid
            let level_len = data.shape()[*axis];
            *coord = (*coord * level_len / base_shape[*axis]).min(level_len - 1);
        }

        data.gather(&fixed, &index.displayed_axes)
    }
}
