use thiserror::Error;

use crate::slice::LayerId;

/// Errors raised by a data source while producing a slice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source is disconnected or unreadable.
    ///
    /// The layer stays in an unavailable state until a later request succeeds.
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// The source failed while computing this particular slice
    #[error("Slice computation failed: {0}")]
    Compute(String),

    /// The index handed to the source does not fit its shape
    #[error("Invalid slice index: {0}")]
    InvalidIndex(String),
}

/// Rejections of a Dims mutation.
///
/// Every variant is an out-of-range condition; the model is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DimsError {
    /// Axis index is not below `ndim`
    #[error("Axis {axis} out of range for {ndim} dimensions")]
    AxisOutOfRange { axis: usize, ndim: usize },

    /// Point value lies outside the known extent of the axis
    #[error("Value {value} out of range for axis {axis}: extent is [{min}, {max}]")]
    PointOutOfRange {
        axis: usize,
        value: usize,
        min: usize,
        max: usize,
    },

    /// Displayed axes are not 2 or 3 distinct axes below `ndim`
    #[error("Invalid displayed axes {axes:?}: {reason}")]
    InvalidDisplayedAxes { axes: Vec<usize>, reason: String },

    /// Axis order is not a permutation of `0..ndim`
    #[error("Invalid axis order {order:?} for {ndim} dimensions")]
    InvalidOrder { order: Vec<usize>, ndim: usize },

    /// Resolution level is not below the known level count
    #[error("Level {level} out of range: {level_count} level(s) available")]
    LevelOutOfRange { level: usize, level_count: usize },
}

/// Fatal configuration errors, detected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Cache capacity must be greater than zero
    #[error("Cache capacity must be greater than 0")]
    ZeroCapacity,

    /// Worker pool needs at least one worker
    #[error("Worker pool size must be greater than 0")]
    ZeroWorkers,

    /// Thumbnail edge length outside the supported range
    #[error("Thumbnail size must be between 1 and {max}, got {size}")]
    InvalidThumbnailSize { size: u32, max: u32 },

    /// Unparsable human-readable byte size
    #[error("Invalid size '{0}': expected a number with optional KB/MB/GB suffix")]
    InvalidSize(String),
}

/// Errors returned by the engine's inbound calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Dims mutation rejected
    #[error(transparent)]
    Dims(#[from] DimsError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No layer with this identifier is registered
    #[error("Unknown layer: {0}")]
    UnknownLayer(LayerId),

    /// The layer's source cannot be sliced
    #[error("Invalid layer: {reason}")]
    InvalidLayer { reason: String },
}

/// Error kinds reported alongside slice events and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Dims mutation with an invalid axis or value
    OutOfRange,
    /// The data source raised while computing a slice
    SliceCompute,
    /// A result superseded by a newer request; never surfaced as an event
    StaleDiscard,
    /// The data source is disconnected or unreadable
    SourceUnavailable,
}

impl From<&SourceError> for ErrorKind {
    fn from(err: &SourceError) -> Self {
        match err {
            SourceError::Unavailable(_) => ErrorKind::SourceUnavailable,
            SourceError::Compute(_) | SourceError::InvalidIndex(_) => ErrorKind::SliceCompute,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "OutOfRange"),
            Self::SliceCompute => write!(f, "SliceComputeError"),
            Self::StaleDiscard => write!(f, "StaleDiscard"),
            Self::SourceUnavailable => write!(f, "SourceUnavailable"),
        }
    }
}
