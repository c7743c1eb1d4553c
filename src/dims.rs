//! Dims model: the current N-dimensional view state.
//!
//! A [`Dims`] value is an immutable, version-stamped snapshot of which axes
//! are displayed, where the slider sits along every other axis, the axis
//! traversal order and the resolution level. [`DimsModel`] validates every
//! mutation against the known extents, produces a fresh snapshot on success
//! and publishes it on a `watch` channel.
//!
//! The model never slices anything itself. The engine forwards each new
//! snapshot to the [`AsyncSlicer`](crate::slice::AsyncSlicer).
//!
//! # Example
//!
//! ```
//! use slice_streamer::dims::DimsModel;
//!
//! let mut model = DimsModel::new(3).unwrap();
//! model.reshape(vec![(0, 9), (0, 255), (0, 255)], 1);
//!
//! let dims = model.set_point(0, 4).unwrap().expect("point changed");
//! assert_eq!(dims.point_tuple(), vec![4]);
//! assert!(model.set_point(0, 10).is_err());
//! ```

use tokio::sync::watch;
use tracing::debug;

use crate::error::DimsError;

/// Number of displayed axes a Dims may have.
const DISPLAY_RANGE: std::ops::RangeInclusive<usize> = 2..=3;

// =============================================================================
// Dims Snapshot
// =============================================================================

/// Immutable snapshot of the view state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dims {
    version: u64,
    point: Vec<usize>,
    displayed_axes: Vec<usize>,
    order: Vec<usize>,
    level: usize,
}

impl Dims {
    /// Default view of an `ndim`-dimensional space: the last two axes are
    /// displayed and every slider sits at 0.
    pub fn new(ndim: usize) -> Result<Self, DimsError> {
        if ndim < *DISPLAY_RANGE.start() {
            return Err(DimsError::InvalidDisplayedAxes {
                axes: (0..ndim).collect(),
                reason: format!("need at least {} dimensions", DISPLAY_RANGE.start()),
            });
        }
        Ok(Self {
            version: 0,
            point: vec![0; ndim],
            displayed_axes: default_displayed(ndim),
            order: (0..ndim).collect(),
            level: 0,
        })
    }

    /// Version stamp, incremented on every change of the model.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn ndim(&self) -> usize {
        self.point.len()
    }

    /// Slider position along every axis.
    ///
    /// Entries for displayed axes are kept but do not affect slicing.
    pub fn point(&self) -> &[usize] {
        &self.point
    }

    pub fn displayed_axes(&self) -> &[usize] {
        &self.displayed_axes
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Axes that are not displayed, ascending.
    pub fn sliced_axes(&self) -> Vec<usize> {
        (0..self.ndim())
            .filter(|axis| !self.displayed_axes.contains(axis))
            .collect()
    }

    /// One coordinate per non-displayed axis, ascending by axis.
    pub fn point_tuple(&self) -> Vec<usize> {
        self.sliced_axes()
            .into_iter()
            .map(|axis| self.point[axis])
            .collect()
    }

    /// Compare the view state, ignoring the version stamp.
    pub fn same_view(&self, other: &Dims) -> bool {
        self.point == other.point
            && self.displayed_axes == other.displayed_axes
            && self.order == other.order
            && self.level == other.level
    }
}

fn default_displayed(ndim: usize) -> Vec<usize> {
    vec![ndim - 2, ndim - 1]
}

fn validate_displayed(axes: &[usize], ndim: usize) -> Result<(), DimsError> {
    let invalid = |reason: String| DimsError::InvalidDisplayedAxes {
        axes: axes.to_vec(),
        reason,
    };

    if !DISPLAY_RANGE.contains(&axes.len()) {
        return Err(invalid(format!("expected 2 or 3 axes, got {}", axes.len())));
    }
    if let Some(axis) = axes.iter().find(|&&axis| axis >= ndim) {
        return Err(invalid(format!("axis {} is not below ndim {}", axis, ndim)));
    }
    for (i, axis) in axes.iter().enumerate() {
        if axes[..i].contains(axis) {
            return Err(invalid(format!("axis {} listed twice", axis)));
        }
    }
    Ok(())
}

fn is_permutation(order: &[usize], ndim: usize) -> bool {
    let mut seen = vec![false; ndim];
    order.len() == ndim
        && order.iter().all(|&axis| {
            axis < ndim && !std::mem::replace(&mut seen[axis], true)
        })
}

// =============================================================================
// Dims Model
// =============================================================================

/// Validating owner of the current [`Dims`].
///
/// Mutations either fail with a [`DimsError`] and leave the model unchanged,
/// or return `Some(snapshot)` with the new state. `None` means the call was
/// valid but did not change anything, so no notification was sent.
pub struct DimsModel {
    current: Dims,

    /// Inclusive index range per axis
    extents: Vec<(usize, usize)>,

    /// Highest level count among the sliced sources (at least 1)
    level_count: usize,

    sender: watch::Sender<Dims>,
}

impl DimsModel {
    /// Create a model of `ndim` axes, each with the extent `[0, 0]`.
    pub fn new(ndim: usize) -> Result<Self, DimsError> {
        let current = Dims::new(ndim)?;
        let (sender, _) = watch::channel(current.clone());
        Ok(Self {
            current,
            extents: vec![(0, 0); ndim],
            level_count: 1,
            sender,
        })
    }

    /// The current snapshot.
    pub fn dims(&self) -> &Dims {
        &self.current
    }

    pub fn extents(&self) -> &[(usize, usize)] {
        &self.extents
    }

    pub fn level_count(&self) -> usize {
        self.level_count
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> watch::Receiver<Dims> {
        self.sender.subscribe()
    }

    /// Move the slider of `axis` to `value`.
    pub fn set_point(&mut self, axis: usize, value: usize) -> Result<Option<Dims>, DimsError> {
        let ndim = self.current.ndim();
        let &(min, max) = self
            .extents
            .get(axis)
            .ok_or(DimsError::AxisOutOfRange { axis, ndim })?;
        if value < min || value > max {
            return Err(DimsError::PointOutOfRange {
                axis,
                value,
                min,
                max,
            });
        }
        if self.current.point[axis] == value {
            return Ok(None);
        }

        let mut next = self.current.clone();
        next.point[axis] = value;
        Ok(Some(self.commit(next)))
    }

    /// Choose which axes are displayed, in display order.
    pub fn set_displayed_axes(&mut self, axes: &[usize]) -> Result<Option<Dims>, DimsError> {
        validate_displayed(axes, self.current.ndim())?;
        if self.current.displayed_axes == axes {
            return Ok(None);
        }

        let mut next = self.current.clone();
        next.displayed_axes = axes.to_vec();
        Ok(Some(self.commit(next)))
    }

    /// Set the axis traversal order.
    pub fn set_order(&mut self, order: &[usize]) -> Result<Option<Dims>, DimsError> {
        let ndim = self.current.ndim();
        if !is_permutation(order, ndim) {
            return Err(DimsError::InvalidOrder {
                order: order.to_vec(),
                ndim,
            });
        }
        if self.current.order == order {
            return Ok(None);
        }

        let mut next = self.current.clone();
        next.order = order.to_vec();
        Ok(Some(self.commit(next)))
    }

    /// Select the resolution level for pyramidal sources.
    pub fn set_level(&mut self, level: usize) -> Result<Option<Dims>, DimsError> {
        if level >= self.level_count {
            return Err(DimsError::LevelOutOfRange {
                level,
                level_count: self.level_count,
            });
        }
        if self.current.level == level {
            return Ok(None);
        }

        let mut next = self.current.clone();
        next.level = level;
        Ok(Some(self.commit(next)))
    }

    /// Adopt new extents (and with them a new dimensionality) and level count.
    ///
    /// Growing prepends axes with the slider at their minimum; shrinking drops
    /// leading axes. Sliders are clamped into the new extents, the level into
    /// the new level count. Displayed axes that no longer exist reset to the
    /// last two axes.
    pub fn reshape(&mut self, mut extents: Vec<(usize, usize)>, level_count: usize) -> Option<Dims> {
        let min_ndim = *DISPLAY_RANGE.start();
        if extents.len() < min_ndim {
            let pad = min_ndim - extents.len();
            extents.splice(0..0, std::iter::repeat((0, 0)).take(pad));
        }

        let old = &self.current;
        let old_ndim = old.ndim();
        let new_ndim = extents.len();
        let mut next = old.clone();

        if new_ndim >= old_ndim {
            let shift = new_ndim - old_ndim;
            next.point = std::iter::repeat(0)
                .take(shift)
                .chain(old.point.iter().copied())
                .collect();
            next.displayed_axes = old.displayed_axes.iter().map(|a| a + shift).collect();
            next.order = (0..shift)
                .chain(old.order.iter().map(|a| a + shift))
                .collect();
        } else {
            let shift = old_ndim - new_ndim;
            next.point = old.point[shift..].to_vec();
            next.displayed_axes = if old.displayed_axes.iter().all(|&a| a >= shift) {
                old.displayed_axes.iter().map(|a| a - shift).collect()
            } else {
                default_displayed(new_ndim)
            };
            next.order = old
                .order
                .iter()
                .filter(|&&a| a >= shift)
                .map(|a| a - shift)
                .collect();
        }

        for (value, &(min, max)) in next.point.iter_mut().zip(&extents) {
            *value = (*value).clamp(min, max);
        }

        self.level_count = level_count.max(1);
        next.level = next.level.min(self.level_count - 1);
        self.extents = extents;

        if next.same_view(&self.current) {
            return None;
        }
        Some(self.commit(next))
    }

    fn commit(&mut self, mut next: Dims) -> Dims {
        next.version = self.current.version + 1;
        debug!(
            version = next.version,
            point = ?next.point,
            displayed = ?next.displayed_axes,
            level = next.level,
            "dims changed"
        );
        self.current = next.clone();
        self.sender.send_replace(next.clone());
        next
    }
}
