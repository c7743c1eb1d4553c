//! The async slicer: dispatch, versioning and staleness control.
//!
//! The slicer lives on the control context. It is the only place that
//! advances request counters, writes computed slices into the cache and
//! publishes events. Worker tasks only compute and report back.
//!
//! ```text
//!   Dims change
//!       │
//!       ▼
//!   for each layer ──► map Dims ──► same as in-flight? ──yes──► (coalesced)
//!                                       │ no
//!                                       ▼
//!                             advance counter (version V)
//!                                       │
//!                          ┌────────────┴────────────┐
//!                          ▼                         ▼
//!                     cache hit                 cache miss
//!                 publish Ready(V)     layer job running? ──yes──► pending slot
//!                                                    │ no          (newest wins)
//!                                                    ▼
//!                                          submit job to pool
//!                                                    │
//!                                                    ▼
//!                                       completion channel (mpsc)
//!                                                    │
//!                                                    ▼
//!                                 V == latest? ──no──► stale, dropped
//!                                        │ yes
//!                                        ▼
//!                           cache put + publish Ready/Failed
//! ```
//!
//! A result is admitted only if its version is still the highest issued for
//! its layer, so a slow old computation can never overwrite a newer result.
//! Each layer has at most one job in the pool; when it completes, the pending
//! request (if still current) is submitted next. A thrashing layer therefore
//! wastes at most one stale source call at a time.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::config::SlicerConfig;
use crate::dims::Dims;
use crate::error::{ConfigError, EngineError, ErrorKind, SourceError};
use crate::source::DataSource;

use super::cache::SliceCache;
use super::layer::{InFlight, Layer, LayerGeometry, LayerStatus};
use super::notifier::{ErrorSink, Notifier};
use super::request::{LayerId, SliceEvent, SliceFailure, SliceRequest, SliceResponse};
use super::worker::{Completion, Job, Outcome, WorkerPool};

// =============================================================================
// Statistics
// =============================================================================

/// Counters describing the slicer's work so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlicerStats {
    /// Slice requests considered (including coalesced ones)
    pub requests: u64,
    /// Identical to the in-flight request, no new version issued
    pub coalesced: u64,
    /// Answered from the cache without dispatch
    pub cache_hits: u64,
    /// Jobs submitted to the worker pool
    pub dispatched: u64,
    /// Computed slices admitted and published
    pub accepted: u64,
    /// Completions dropped because a newer request exists
    pub stale_discarded: u64,
    /// Requests superseded before calling their source
    pub skipped: u64,
    /// Source cancel hooks invoked
    pub cancel_hooks: u64,
    /// Failed requests published as errors
    pub failures: u64,
}

/// What happened to one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Accepted,
    Failed(ErrorKind),
    StaleDiscarded,
    Skipped,
}

// =============================================================================
// Async Slicer
// =============================================================================

/// Invoke the source's advisory cancel hook for a superseded request.
///
/// Only the request submitted to the pool can be using the source; a request
/// still in the pending slot is simply dropped.
fn cancel_superseded(config: &SlicerConfig, stats: &mut SlicerStats, layer: &Layer, in_flight: &InFlight) {
    if layer.running != Some(in_flight.version) {
        return;
    }
    if config.cancellation && layer.source.supports_cancel() {
        trace!(layer = %layer.id, version = in_flight.version, "invoking source cancel hook");
        layer.source.cancel(&in_flight.index);
        stats.cancel_hooks += 1;
    }
}

/// Per-layer dispatcher and result gate.
pub struct AsyncSlicer {
    config: SlicerConfig,
    cache: Arc<SliceCache>,
    pool: WorkerPool,
    layers: BTreeMap<LayerId, Layer>,
    notifier: Notifier,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    outstanding: usize,
    stats: SlicerStats,
}

impl AsyncSlicer {
    /// Create a slicer with its own cache.
    pub fn new(config: SlicerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = Arc::new(SliceCache::new(config.cache)?);
        Self::with_cache(config, cache)
    }

    /// Create a slicer around an existing, possibly shared, cache.
    pub fn with_cache(config: SlicerConfig, cache: Arc<SliceCache>) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = WorkerPool::new(config.workers)?;
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        info!(
            workers = pool.size(),
            cache = ?cache.capacity(),
            cancellation = config.cancellation,
            "slicer created"
        );

        Ok(Self {
            config,
            cache,
            pool,
            layers: BTreeMap::new(),
            notifier: Notifier::new(),
            completion_tx,
            completion_rx,
            outstanding: 0,
            stats: SlicerStats::default(),
        })
    }

    /// Receive every published event from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SliceEvent> {
        self.notifier.subscribe()
    }

    pub fn set_error_sink(&mut self, sink: Arc<dyn ErrorSink>) {
        self.notifier.set_error_sink(sink);
    }

    // -------------------------------------------------------------------------
    // Layer lifecycle
    // -------------------------------------------------------------------------

    /// Register a layer. Nothing is sliced until the next Dims change.
    pub fn add_layer(&mut self, source: Arc<dyn DataSource>) -> Result<LayerId, EngineError> {
        let id = LayerId::next();
        let layer = Layer::new(id, source)?;

        debug!(layer = %id, extents = ?layer.geometry.extents, levels = layer.geometry.level_count, "layer added");
        self.layers.insert(id, layer);
        Ok(id)
    }

    /// Unregister a layer, dropping its cache entries and in-flight work.
    ///
    /// Completions that arrive later for this layer are discarded.
    pub async fn remove_layer(&mut self, id: LayerId) -> Result<(), EngineError> {
        let mut layer = self.layers.remove(&id).ok_or(EngineError::UnknownLayer(id))?;

        // queued jobs see a newer version and skip their source call
        layer.counter.advance();
        if let Some(in_flight) = layer.in_flight.take() {
            cancel_superseded(&self.config, &mut self.stats, &layer, &in_flight);
        }

        let dropped = self.cache.invalidate(id).await;
        self.notifier.forget(id);
        debug!(layer = %id, dropped, "layer removed");
        Ok(())
    }

    /// Swap the data source of a layer.
    ///
    /// Cached slices and in-flight work for the old source are invalidated.
    /// The caller re-slices the layer with the current Dims.
    pub async fn replace_source(&mut self, id: LayerId, source: Arc<dyn DataSource>) -> Result<(), EngineError> {
        let geometry = LayerGeometry::of(source.as_ref())?;
        let layer = self.layers.get_mut(&id).ok_or(EngineError::UnknownLayer(id))?;

        layer.counter.advance();
        if let Some(in_flight) = layer.in_flight.take() {
            cancel_superseded(&self.config, &mut self.stats, layer, &in_flight);
        }
        if layer.pending.take().is_some() {
            self.stats.skipped += 1;
        }
        layer.source = source;
        layer.geometry = geometry;
        layer.status = LayerStatus::Pending;

        let dropped = self.cache.invalidate(id).await;
        debug!(layer = %id, dropped, "layer source replaced");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Slice every layer for a new Dims snapshot.
    pub async fn on_dims_change(&mut self, dims: &Dims) {
        let ids: Vec<LayerId> = self.layers.keys().copied().collect();
        for id in ids {
            self.dispatch(id, dims).await;
        }
    }

    /// Slice one layer for `dims`.
    ///
    /// Returns the issued version, or `None` if the request was coalesced with
    /// the identical one already in flight.
    pub async fn slice_layer(&mut self, id: LayerId, dims: &Dims) -> Result<Option<u64>, EngineError> {
        if !self.layers.contains_key(&id) {
            return Err(EngineError::UnknownLayer(id));
        }
        Ok(self.dispatch(id, dims).await)
    }

    /// Drop the cached slices of a layer and slice it again.
    pub async fn refresh(&mut self, id: LayerId, dims: &Dims) -> Result<Option<u64>, EngineError> {
        let layer = self.layers.get_mut(&id).ok_or(EngineError::UnknownLayer(id))?;
        // a refresh must not be coalesced away
        if let Some(in_flight) = layer.in_flight.take() {
            cancel_superseded(&self.config, &mut self.stats, layer, &in_flight);
        }
        self.cache.invalidate(id).await;
        Ok(self.dispatch(id, dims).await)
    }

    async fn dispatch(&mut self, id: LayerId, dims: &Dims) -> Option<u64> {
        let layer = self.layers.get_mut(&id)?;
        let index = layer.geometry.map_dims(dims);
        self.stats.requests += 1;

        if let Some(in_flight) = &layer.in_flight {
            if in_flight.index == index && in_flight.version == layer.counter.latest() {
                trace!(layer = %id, version = in_flight.version, "coalesced with in-flight request");
                self.stats.coalesced += 1;
                return None;
            }
        }

        let version = layer.counter.advance();
        if let Some(superseded) = layer.in_flight.take() {
            cancel_superseded(&self.config, &mut self.stats, layer, &superseded);
        }

        let request = SliceRequest::new(id, version, index);
        let key = request.cache_key();

        if let Some(slice) = self.cache.get(&key).await {
            debug!(layer = %id, version, point = ?key.point, "slice served from cache");
            self.stats.cache_hits += 1;
            if layer.pending.take().is_some() {
                self.stats.skipped += 1;
            }
            layer.status = LayerStatus::Ready { version };
            self.notifier
                .publish(SliceEvent::Ready(SliceResponse::new(id, version, slice, true)));
            return Some(version);
        }

        layer.in_flight = Some(InFlight {
            version,
            index: request.index.clone(),
        });
        if let Some(running) = layer.running {
            trace!(layer = %id, version, running, "queued behind running request");
            if let Some(replaced) = layer.pending.replace(request) {
                trace!(layer = %id, version = replaced.version, "pending request superseded");
                self.stats.skipped += 1;
            }
        } else {
            self.submit(id, request);
        }
        Some(version)
    }

    /// Hand a request to the worker pool and mark it as the layer's running job.
    fn submit(&mut self, id: LayerId, request: SliceRequest) {
        let Some(layer) = self.layers.get_mut(&id) else {
            return;
        };
        debug!(
            layer = %id,
            version = request.version,
            point = ?request.index.point,
            level = request.index.level,
            "dispatching slice"
        );
        layer.running = Some(request.version);
        let job = Job {
            request,
            source: layer.source.clone(),
            counter: layer.counter.clone(),
            thumbnail_size: self.config.thumbnail_size,
        };
        self.pool.submit(job, self.completion_tx.clone());
        self.outstanding += 1;
        self.stats.dispatched += 1;
    }

    /// Submit the layer's pending request once its running job has finished.
    fn start_pending(&mut self, id: LayerId) {
        let Some(layer) = self.layers.get_mut(&id) else {
            return;
        };
        if layer.running.is_some() {
            return;
        }
        let Some(request) = layer.pending.take() else {
            return;
        };
        if request.version < layer.counter.latest() {
            trace!(layer = %id, version = request.version, "pending request superseded");
            self.stats.skipped += 1;
            return;
        }
        self.submit(id, request);
    }

    // -------------------------------------------------------------------------
    // Completions
    // -------------------------------------------------------------------------

    /// Wait for the next completion and handle it.
    ///
    /// Returns `None` when no job is outstanding.
    pub async fn process_next(&mut self) -> Option<CompletionOutcome> {
        if self.outstanding == 0 {
            return None;
        }
        let completion = self.completion_rx.recv().await?;
        self.outstanding -= 1;
        let layer_id = completion.layer_id;
        let outcome = self.handle(completion).await;
        self.start_pending(layer_id);
        Some(outcome)
    }

    /// Handle every completion that is already available, without waiting.
    pub async fn poll_ready(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.outstanding = self.outstanding.saturating_sub(1);
            let layer_id = completion.layer_id;
            self.handle(completion).await;
            self.start_pending(layer_id);
            handled += 1;
        }
        handled
    }

    /// Handle completions until no job is outstanding.
    pub async fn run_until_idle(&mut self) {
        while self.process_next().await.is_some() {}
    }

    async fn handle(&mut self, completion: Completion) -> CompletionOutcome {
        let Completion {
            layer_id,
            version,
            key,
            outcome,
        } = completion;

        let Some(layer) = self.layers.get_mut(&layer_id) else {
            debug!(layer = %layer_id, version, "completion for removed layer discarded");
            self.stats.stale_discarded += 1;
            return CompletionOutcome::StaleDiscarded;
        };
        if layer.running == Some(version) {
            layer.running = None;
        }

        if matches!(outcome, Outcome::Skipped) {
            self.stats.skipped += 1;
            return CompletionOutcome::Skipped;
        }

        let latest = layer.counter.latest();
        if version < latest {
            debug!(layer = %layer_id, version, latest, "stale slice discarded");
            self.stats.stale_discarded += 1;
            return CompletionOutcome::StaleDiscarded;
        }
        if layer.in_flight.as_ref().is_some_and(|f| f.version == version) {
            layer.in_flight = None;
        }

        match outcome {
            Outcome::Sliced(slice) => {
                self.cache.put(key, slice.clone()).await;
                layer.status = LayerStatus::Ready { version };
                self.stats.accepted += 1;
                self.notifier
                    .publish(SliceEvent::Ready(SliceResponse::new(layer_id, version, slice, false)));
                CompletionOutcome::Accepted
            }
            Outcome::Failed(err) => {
                let kind = ErrorKind::from(&err);
                let message = err.to_string();
                layer.status = match err {
                    SourceError::Unavailable(_) => LayerStatus::Unavailable {
                        message: message.clone(),
                    },
                    _ => LayerStatus::Failed {
                        version,
                        message: message.clone(),
                    },
                };
                self.stats.failures += 1;
                self.notifier.publish(SliceEvent::Failed(SliceFailure {
                    layer_id,
                    version,
                    kind,
                    message,
                }));
                CompletionOutcome::Failed(kind)
            }
            Outcome::Skipped => CompletionOutcome::Skipped,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.keys().copied().collect()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_status(&self, id: LayerId) -> Option<&LayerStatus> {
        self.layers.get(&id).map(|layer| &layer.status)
    }

    pub fn layer_geometry(&self, id: LayerId) -> Option<&LayerGeometry> {
        self.layers.get(&id).map(|layer| &layer.geometry)
    }

    /// Geometries of all layers, in registration order.
    pub fn geometries(&self) -> impl Iterator<Item = &LayerGeometry> {
        self.layers.values().map(|layer| &layer.geometry)
    }

    /// Highest version issued for a layer.
    pub fn latest_version(&self, id: LayerId) -> Option<u64> {
        self.layers.get(&id).map(|layer| layer.counter.latest())
    }

    /// Jobs submitted whose completion has not been handled yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn stats(&self) -> SlicerStats {
        self.stats
    }

    pub fn cache(&self) -> &Arc<SliceCache> {
        &self.cache
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn config(&self) -> &SlicerConfig {
        &self.config
    }
}
