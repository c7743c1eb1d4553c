//! Inbound facade: Dims mutations and layer lifecycle.
//!
//! [`SliceEngine`] pairs the [`DimsModel`] with the [`AsyncSlicer`]. Every
//! successful Dims mutation is forwarded as a fresh snapshot to the slicer;
//! rejected mutations return an error and leave both untouched.
//!
//! The global dimensionality is the largest layer dimensionality (at least
//! 2), and the extent of every global axis is the union of the extents of the
//! layer axes aligned with it. Adding, removing or replacing a layer reshapes
//! the Dims accordingly.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use slice_streamer::config::SlicerConfig;
//! use slice_streamer::engine::SliceEngine;
//! use slice_streamer::source::{ArrayData, ArraySource};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut engine = SliceEngine::new(SlicerConfig::default()).unwrap();
//!     let mut events = engine.subscribe();
//!
//!     let volume = ArrayData::from_fn(vec![3, 4, 4], |idx| idx[0] as u8);
//!     engine.add_layer(Arc::new(ArraySource::new(volume).unwrap())).await.unwrap();
//!
//!     engine.set_point(0, 2).await.unwrap();
//!     engine.run_until_idle().await;
//!
//!     let mut last = None;
//!     while let Ok(event) = events.try_recv() {
//!         last = event.response().cloned();
//!     }
//!     assert_eq!(last.unwrap().data.value_f64(0), Some(2.0));
//! }
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::config::SlicerConfig;
use crate::dims::{Dims, DimsModel};
use crate::error::EngineError;
use crate::slice::{
    AsyncSlicer, CacheStats, CompletionOutcome, ErrorSink, LayerId, LayerStatus, SliceCache,
    SliceEvent, SlicerStats,
};
use crate::source::DataSource;

/// Dims model and slicer driven together from the control context.
pub struct SliceEngine {
    dims: DimsModel,
    slicer: AsyncSlicer,
}

impl SliceEngine {
    pub fn new(config: SlicerConfig) -> Result<Self, EngineError> {
        Ok(Self {
            dims: DimsModel::new(2)?,
            slicer: AsyncSlicer::new(config)?,
        })
    }

    /// Create an engine whose slicer uses a shared cache.
    pub fn with_cache(config: SlicerConfig, cache: Arc<SliceCache>) -> Result<Self, EngineError> {
        Ok(Self {
            dims: DimsModel::new(2)?,
            slicer: AsyncSlicer::with_cache(config, cache)?,
        })
    }

    /// The current Dims snapshot.
    pub fn dims(&self) -> &Dims {
        self.dims.dims()
    }

    pub fn dims_model(&self) -> &DimsModel {
        &self.dims
    }

    /// Subscribe to Dims change notifications.
    pub fn subscribe_dims(&self) -> watch::Receiver<Dims> {
        self.dims.subscribe()
    }

    /// Subscribe to slice events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SliceEvent> {
        self.slicer.subscribe()
    }

    pub fn set_error_sink(&mut self, sink: Arc<dyn ErrorSink>) {
        self.slicer.set_error_sink(sink);
    }

    // =========================================================================
    // Layer Lifecycle
    // =========================================================================

    /// Register a layer and slice it with the current view.
    pub async fn add_layer(&mut self, source: Arc<dyn DataSource>) -> Result<LayerId, EngineError> {
        let id = self.slicer.add_layer(source)?;
        match self.reshape() {
            Some(dims) => self.slicer.on_dims_change(&dims).await,
            None => {
                self.slicer.slice_layer(id, self.dims.dims()).await?;
            }
        }
        Ok(id)
    }

    /// Unregister a layer; its cached slices and pending results are dropped.
    pub async fn remove_layer(&mut self, id: LayerId) -> Result<(), EngineError> {
        self.slicer.remove_layer(id).await?;
        if let Some(dims) = self.reshape() {
            self.slicer.on_dims_change(&dims).await;
        }
        Ok(())
    }

    /// Swap the data behind a layer and slice it again.
    pub async fn replace_source(&mut self, id: LayerId, source: Arc<dyn DataSource>) -> Result<(), EngineError> {
        self.slicer.replace_source(id, source).await?;
        match self.reshape() {
            Some(dims) => self.slicer.on_dims_change(&dims).await,
            None => {
                self.slicer.slice_layer(id, self.dims.dims()).await?;
            }
        }
        Ok(())
    }

    /// Drop a layer's cached slices and slice it again, e.g. after its
    /// underlying data changed in place.
    pub async fn refresh(&mut self, id: LayerId) -> Result<(), EngineError> {
        self.slicer.refresh(id, self.dims.dims()).await?;
        Ok(())
    }

    // =========================================================================
    // Dims Mutations
    // =========================================================================

    pub async fn set_point(&mut self, axis: usize, value: usize) -> Result<(), EngineError> {
        if let Some(dims) = self.dims.set_point(axis, value)? {
            self.slicer.on_dims_change(&dims).await;
        }
        Ok(())
    }

    pub async fn set_displayed_axes(&mut self, axes: &[usize]) -> Result<(), EngineError> {
        if let Some(dims) = self.dims.set_displayed_axes(axes)? {
            self.slicer.on_dims_change(&dims).await;
        }
        Ok(())
    }

    pub async fn set_level(&mut self, level: usize) -> Result<(), EngineError> {
        if let Some(dims) = self.dims.set_level(level)? {
            self.slicer.on_dims_change(&dims).await;
        }
        Ok(())
    }

    /// Change the axis traversal order. Slices do not depend on it, so nothing
    /// is dispatched.
    pub fn set_order(&mut self, order: &[usize]) -> Result<(), EngineError> {
        self.dims.set_order(order)?;
        Ok(())
    }

    /// Recompute the global shape from the registered layers.
    fn reshape(&mut self) -> Option<Dims> {
        let geometries: Vec<_> = self.slicer.geometries().collect();
        let ndim = geometries.iter().map(|g| g.ndim()).max().unwrap_or(0).max(2);

        let mut extents: Vec<Option<(usize, usize)>> = vec![None; ndim];
        for geometry in &geometries {
            let offset = ndim - geometry.ndim();
            for (slot, &(min, max)) in extents[offset..].iter_mut().zip(&geometry.extents) {
                *slot = Some(match *slot {
                    Some((lo, hi)) => (lo.min(min), hi.max(max)),
                    None => (min, max),
                });
            }
        }
        let extents = extents.into_iter().map(|e| e.unwrap_or((0, 0))).collect();
        let level_count = geometries.iter().map(|g| g.level_count).max().unwrap_or(1);

        self.dims.reshape(extents, level_count)
    }

    // =========================================================================
    // Completions
    // =========================================================================

    /// Wait for and handle the next completion; `None` when idle.
    pub async fn process_next(&mut self) -> Option<CompletionOutcome> {
        self.slicer.process_next().await
    }

    /// Handle the completions already available without waiting.
    pub async fn poll_ready(&mut self) -> usize {
        self.slicer.poll_ready().await
    }

    pub async fn run_until_idle(&mut self) {
        self.slicer.run_until_idle().await
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.slicer.layer_ids()
    }

    pub fn layer_status(&self, id: LayerId) -> Option<&LayerStatus> {
        self.slicer.layer_status(id)
    }

    pub fn stats(&self) -> SlicerStats {
        self.slicer.stats()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.slicer.cache().stats().await
    }

    pub fn slicer(&self) -> &AsyncSlicer {
        &self.slicer
    }
}
