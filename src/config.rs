//! Configuration for the slicer and the `slice-streamer` binary.
//!
//! Library users build a [`SlicerConfig`] directly. The binary parses its
//! options with clap; every option can also be set through an environment
//! variable with the `SLICE_` prefix:
//!
//! - `SLICE_WORKERS` - Worker pool size (default: available parallelism)
//! - `SLICE_CACHE_ENTRIES` - Max cached slices (default: 256)
//! - `SLICE_CACHE_BYTES` - Byte budget instead of an entry count, e.g. `64MB`
//! - `SLICE_NO_CANCEL` - Do not invoke source cancel hooks
//! - `SLICE_THUMBNAIL_SIZE` - Thumbnail edge in pixels, 0 disables (default: 64)
//! - `SLICE_DEPTH`, `SLICE_SIZE`, `SLICE_LEVELS` - Synthetic volume shape
//! - `SLICE_LATENCY_MS` - Artificial source latency (default: 20)
//! - `SLICE_PASSES`, `SLICE_INTERVAL_MS` - Scrub pattern
//!
//! # Example
//!
//! ```
//! use slice_streamer::config::{parse_size, SlicerConfig};
//! use slice_streamer::slice::CacheCapacity;
//!
//! let config = SlicerConfig::default()
//!     .with_workers(4)
//!     .with_cache(CacheCapacity::Bytes(parse_size("64MB").unwrap()));
//! assert!(config.validate().is_ok());
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::slice::{
    default_worker_count, CacheCapacity, DEFAULT_SLICE_CACHE_ENTRIES, DEFAULT_THUMBNAIL_SIZE,
    MAX_THUMBNAIL_SIZE,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default number of z planes in the synthetic volume.
pub const DEFAULT_DEPTH: usize = 32;

/// Default edge length of each synthetic plane.
pub const DEFAULT_SIZE: usize = 512;

/// Default artificial source latency in milliseconds.
pub const DEFAULT_LATENCY_MS: u64 = 20;

/// Default number of forward/backward scrub passes.
pub const DEFAULT_PASSES: usize = 2;

/// Default delay between slider steps in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 5;

// =============================================================================
// Slicer Configuration
// =============================================================================

/// Configuration surface exposed to host applications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicerConfig {
    /// Maximum number of concurrent source calls
    pub workers: usize,

    /// Cache bound, in entries or bytes
    pub cache: CacheCapacity,

    /// Invoke source cancel hooks when a request is superseded
    pub cancellation: bool,

    /// Thumbnail edge length; `None` disables thumbnails
    pub thumbnail_size: Option<u32>,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            cache: CacheCapacity::default(),
            cancellation: true,
            thumbnail_size: Some(DEFAULT_THUMBNAIL_SIZE),
        }
    }
}

impl SlicerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_cache(mut self, cache: CacheCapacity) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cancellation(mut self, cancellation: bool) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_thumbnail_size(mut self, thumbnail_size: Option<u32>) -> Self {
        self.thumbnail_size = thumbnail_size;
        self
    }

    /// Check for fatal configuration errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        self.cache.validate()?;
        if let Some(size) = self.thumbnail_size {
            if size == 0 || size > MAX_THUMBNAIL_SIZE {
                return Err(ConfigError::InvalidThumbnailSize {
                    size,
                    max: MAX_THUMBNAIL_SIZE,
                });
            }
        }
        Ok(())
    }
}

/// Parse a human-readable byte size such as `512`, `64KB`, `64MB` or `2GB`.
///
/// Suffixes are binary multiples and case-insensitive.
pub fn parse_size(input: &str) -> Result<usize, ConfigError> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();
    let split = upper
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(upper.len());
    let (digits, suffix) = upper.split_at(split);

    let multiplier: usize = match suffix.trim() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(ConfigError::InvalidSize(trimmed.to_string())),
    };

    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| ConfigError::InvalidSize(trimmed.to_string()))
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Slice Streamer - asynchronous N-dimensional slicing engine.
#[derive(Parser, Debug, Clone)]
#[command(name = "slice-streamer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scrub through a synthetic volume and report what the slicer did.
    Scrub(ScrubConfig),
}

/// Output format for the scrub summary.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
pub struct ScrubConfig {
    // =========================================================================
    // Volume
    // =========================================================================
    /// Number of z planes.
    #[arg(long, default_value_t = DEFAULT_DEPTH, env = "SLICE_DEPTH")]
    pub depth: usize,

    /// Edge length of each (y, x) plane.
    #[arg(long, default_value_t = DEFAULT_SIZE, env = "SLICE_SIZE")]
    pub size: usize,

    /// Number of pyramid levels (1 = flat).
    #[arg(long, default_value_t = 1, env = "SLICE_LEVELS")]
    pub levels: usize,

    /// Artificial latency of every source call, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_LATENCY_MS, env = "SLICE_LATENCY_MS")]
    pub latency_ms: u64,

    // =========================================================================
    // Scrub Pattern
    // =========================================================================
    /// Forward and backward passes over the z axis.
    #[arg(long, default_value_t = DEFAULT_PASSES, env = "SLICE_PASSES")]
    pub passes: usize,

    /// Delay between slider steps, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_INTERVAL_MS, env = "SLICE_INTERVAL_MS")]
    pub interval_ms: u64,

    // =========================================================================
    // Slicer Configuration
    // =========================================================================
    /// Worker pool size.
    ///
    /// Defaults to the available hardware concurrency.
    #[arg(long, env = "SLICE_WORKERS")]
    pub workers: Option<usize>,

    /// Maximum number of cached slices.
    #[arg(long, default_value_t = DEFAULT_SLICE_CACHE_ENTRIES, env = "SLICE_CACHE_ENTRIES")]
    pub cache_entries: usize,

    /// Bound the cache by bytes instead of entries (e.g. 64MB).
    #[arg(long, env = "SLICE_CACHE_BYTES")]
    pub cache_bytes: Option<String>,

    /// Do not invoke source cancel hooks on superseded requests.
    #[arg(long, default_value_t = false, env = "SLICE_NO_CANCEL")]
    pub no_cancel: bool,

    /// Thumbnail edge length in pixels (0 disables thumbnails).
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_SIZE, env = "SLICE_THUMBNAIL_SIZE")]
    pub thumbnail_size: u32,

    // =========================================================================
    // Output
    // =========================================================================
    /// Summary format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ScrubConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.depth == 0 {
            return Err("depth must be greater than 0".to_string());
        }
        if self.size < 2 {
            return Err("size must be at least 2".to_string());
        }
        if self.levels == 0 {
            return Err("levels must be greater than 0".to_string());
        }
        if self.levels > 1 && (self.size >> (self.levels - 1)) == 0 {
            return Err(format!(
                "{} levels do not fit a plane of size {}",
                self.levels, self.size
            ));
        }
        if self.passes == 0 {
            return Err("passes must be greater than 0".to_string());
        }
        self.slicer_config()?.validate().map_err(|e| e.to_string())
    }

    /// Build the slicer configuration from the CLI options.
    pub fn slicer_config(&self) -> Result<SlicerConfig, String> {
        let cache = match &self.cache_bytes {
            Some(size) => CacheCapacity::Bytes(parse_size(size).map_err(|e| e.to_string())?),
            None => CacheCapacity::Entries(self.cache_entries),
        };
        let thumbnail_size = (self.thumbnail_size > 0).then_some(self.thumbnail_size);

        Ok(SlicerConfig {
            workers: self.workers.unwrap_or_else(default_worker_count),
            cache,
            cancellation: !self.no_cancel,
            thumbnail_size,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
