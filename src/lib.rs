//! # Slice Streamer
//!
//! An asynchronous slice request, caching and dispatch engine for browsing
//! large N-dimensional datasets.
//!
//! A viewer moves sliders, switches displayed axes or changes resolution
//! level; each change produces a new immutable Dims snapshot. The engine turns
//! that snapshot into a 2D/3D slice of every layer, computing slices on a
//! bounded worker pool and never blocking the caller. Results that have been
//! superseded by a newer view are dropped, and previously seen slices are
//! served straight from an LRU cache.
//!
//! ## Features
//!
//! - **Versioned requests**: per-layer counters guarantee that a slow old
//!   computation never replaces a newer slice
//! - **Slice cache**: LRU, bounded by entry count or bytes, shared across layers
//! - **Bounded concurrency**: a semaphore-limited worker pool with pre-start
//!   staleness checks and optional source cancel hooks
//! - **Pluggable sources**: any type implementing [`DataSource`], with
//!   in-memory arrays, pyramids and point overlays included
//!
//! ## Architecture
//!
//! - [`source`] - Data source capability and in-memory implementations
//! - [`dims`] - Dims snapshots and the validating Dims model
//! - [`slice`] - Requests, cache, worker pool, notifier and the async slicer
//! - [`engine`] - Inbound facade tying Dims mutations to the slicer
//! - [`config`] - Slicer configuration and CLI types
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use slice_streamer::{ArrayData, ArraySource, SliceEngine, SlicerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut engine = SliceEngine::new(SlicerConfig::default().with_workers(2)).unwrap();
//!     let mut events = engine.subscribe();
//!
//!     // a (z, y, x) volume
//!     let volume = ArrayData::from_fn(vec![10, 64, 64], |idx| (idx[0] * 1000 + idx[1]) as u16);
//!     let layer = engine.add_layer(Arc::new(ArraySource::new(volume).unwrap())).await.unwrap();
//!
//!     for z in 1..10 {
//!         engine.set_point(0, z).await.unwrap();
//!     }
//!     engine.run_until_idle().await;
//!
//!     let mut latest = None;
//!     while let Ok(event) = events.try_recv() {
//!         if let Some(response) = event.response() {
//!             assert_eq!(response.layer_id, layer);
//!             latest = Some(response.clone());
//!         }
//!     }
//!     assert_eq!(latest.unwrap().data.value_f64(0), Some(9000.0));
//! }
//! ```

pub mod config;
pub mod dims;
pub mod engine;
pub mod error;
pub mod slice;
pub mod source;

// Re-export commonly used types
pub use config::{parse_size, Cli, Command, OutputFormat, ScrubConfig, SlicerConfig};
pub use dims::{Dims, DimsModel};
pub use engine::SliceEngine;
pub use error::{ConfigError, DimsError, EngineError, ErrorKind, SourceError};
pub use slice::{
    make_thumbnail, AsyncSlicer, CacheCapacity, CacheStats, CompletionOutcome, ErrorSink,
    LayerGeometry, LayerId, LayerStatus, SliceCache, SliceCacheKey, SliceData, SliceEvent,
    SliceFailure, SliceRequest, SliceResponse, SlicerStats, Thumbnail, TracingErrorSink,
    WorkerPool, DEFAULT_SLICE_CACHE_ENTRIES, DEFAULT_THUMBNAIL_SIZE,
};
pub use source::{
    ArrayData, ArraySource, DType, DataSource, Element, PointsSource, SliceIndex, SourceKind,
    Throttled,
};
