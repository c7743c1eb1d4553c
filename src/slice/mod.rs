//! Slice request dispatch, caching and delivery.
//!
//! This module turns Dims snapshots into slices of every registered layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        AsyncSlicer                          │
//! │  (control context: counters, staleness gate, publication)   │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                      │
//!          ▼                    ▼                      ▼
//! ┌─────────────────┐  ┌─────────────────┐   ┌─────────────────┐
//! │   SliceCache    │  │   WorkerPool    │   │    Notifier     │
//! │  (LRU, shared)  │  │ (bounded tasks) │   │  (subscribers)  │
//! └─────────────────┘  └─────────────────┘   └─────────────────┘
//!                               │
//!                               ▼
//!                      ┌─────────────────┐
//!                      │   DataSource    │
//!                      └─────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Per layer, accepted versions only ever increase
//! - A cached slice is served without calling the source
//! - The cache lock is never held across a source call
//! - Layers are independent: a slow source delays only its own layer
//! - At most one job per layer is in the worker pool at any time

mod cache;
mod layer;
mod notifier;
mod request;
mod slicer;
mod thumbnail;
mod worker;

pub use cache::{CacheCapacity, CacheStats, SliceCache, SliceCacheKey, DEFAULT_SLICE_CACHE_ENTRIES};
pub use layer::{LayerGeometry, LayerStatus};
pub use notifier::{ErrorSink, Notifier, TracingErrorSink};
pub use request::{LayerId, SliceData, SliceEvent, SliceFailure, SliceRequest, SliceResponse};
pub use slicer::{AsyncSlicer, CompletionOutcome, SlicerStats};
pub use thumbnail::{make_thumbnail, Thumbnail, DEFAULT_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE};
pub use worker::{default_worker_count, WorkerPool};
