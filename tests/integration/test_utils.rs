//! Test utilities for integration tests.
//!
//! Mock data sources that count, record, delay, gate or fail their slice
//! calls, plus helpers for building volumes and draining events.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use slice_streamer::{
    ArrayData, ArraySource, DataSource, SliceEvent, SliceIndex, SliceResponse, SourceError,
    SourceKind,
};

// =============================================================================
// Volumes
// =============================================================================

/// Value stored at `(z, y, x)` in [`volume`].
pub fn voxel(z: usize, y: usize, x: usize) -> u16 {
    (z * 1000 + y * 10 + x) as u16
}

/// A `(depth, size, size)` u16 volume with distinct values per voxel.
pub fn volume(depth: usize, size: usize) -> ArrayData {
    ArrayData::from_fn(vec![depth, size, size], |idx| voxel(idx[0], idx[1], idx[2]))
}

/// The `(y, x)` plane of [`volume`] at `z`.
pub fn plane(z: usize, size: usize) -> ArrayData {
    ArrayData::from_fn(vec![size, size], |idx| voxel(z, idx[0], idx[1]))
}

/// Index of the `(y, x)` plane at `z` of a 3D source.
pub fn z_index(z: usize) -> SliceIndex {
    SliceIndex::new(0, vec![z], vec![1, 2])
}

// =============================================================================
// Counting Source
// =============================================================================

/// A source that counts and records every slice and cancel call.
#[derive(Clone)]
pub struct CountingSource {
    inner: Arc<ArraySource>,
    slice_count: Arc<AtomicUsize>,
    cancel_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<SliceIndex>>>,
    cancellable: bool,
}

impl CountingSource {
    pub fn new(data: ArrayData) -> Self {
        Self {
            inner: Arc::new(ArraySource::new(data).unwrap()),
            slice_count: Arc::new(AtomicUsize::new(0)),
            cancel_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            cancellable: false,
        }
    }

    /// Advertise a cancel hook.
    pub fn cancellable(mut self) -> Self {
        self.cancellable = true;
        self
    }

    pub fn slice_count(&self) -> usize {
        self.slice_count.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancel_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SliceIndex> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSource for CountingSource {
    fn ndim(&self) -> usize {
        self.inner.ndim()
    }

    fn extent(&self, axis: usize) -> Option<(usize, usize)> {
        self.inner.extent(axis)
    }

    async fn slice(&self, index: &SliceIndex) -> Result<ArrayData, SourceError> {
        self.slice_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(index.clone());
        self.inner.slice(index).await
    }

    fn supports_cancel(&self) -> bool {
        self.cancellable
    }

    fn cancel(&self, _index: &SliceIndex) {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Gated Source
// =============================================================================

/// A source whose slice calls block until the gate is opened.
#[derive(Clone)]
pub struct GatedSource {
    inner: Arc<ArraySource>,
    gate: Arc<watch::Sender<bool>>,
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl GatedSource {
    pub fn new(data: ArrayData) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            inner: Arc::new(ArraySource::new(data).unwrap()),
            gate: Arc::new(gate),
            started: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    /// Block slice calls that start from now on.
    pub fn close(&self) {
        self.gate.send_replace(false);
    }

    /// Slice calls that have entered the source.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for GatedSource {
    fn ndim(&self) -> usize {
        self.inner.ndim()
    }

    fn extent(&self, axis: usize) -> Option<(usize, usize)> {
        self.inner.extent(axis)
    }

    async fn slice(&self, index: &SliceIndex) -> Result<ArrayData, SourceError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.gate.subscribe();
        rx.wait_for(|open| *open)
            .await
            .map_err(|_| SourceError::Unavailable("gate dropped".to_string()))?;
        let result = self.inner.slice(index).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}

// =============================================================================
// Delayed Source
// =============================================================================

/// A source whose latency depends on the requested index.
pub struct DelayedSource {
    inner: ArraySource,
    delay: Box<dyn Fn(&SliceIndex) -> Duration + Send + Sync>,
}

impl DelayedSource {
    pub fn new(
        data: ArrayData,
        delay: impl Fn(&SliceIndex) -> Duration + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: ArraySource::new(data).unwrap(),
            delay: Box::new(delay),
        }
    }
}

#[async_trait]
impl DataSource for DelayedSource {
    fn ndim(&self) -> usize {
        self.inner.ndim()
    }

    fn extent(&self, axis: usize) -> Option<(usize, usize)> {
        self.inner.extent(axis)
    }

    async fn slice(&self, index: &SliceIndex) -> Result<ArrayData, SourceError> {
        tokio::time::sleep((self.delay)(index)).await;
        self.inner.slice(index).await
    }
}

// =============================================================================
// Flaky Source
// =============================================================================

/// Behaviour of a [`FlakySource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Healthy = 0,
    Failing = 1,
    Disconnected = 2,
    Panicking = 3,
}

/// A source whose behaviour can be switched at runtime.
#[derive(Clone)]
pub struct FlakySource {
    inner: Arc<ArraySource>,
    mode: Arc<AtomicU8>,
    slice_count: Arc<AtomicUsize>,
}

impl FlakySource {
    pub fn new(data: ArrayData) -> Self {
        Self {
            inner: Arc::new(ArraySource::new(data).unwrap()),
            mode: Arc::new(AtomicU8::new(Mode::Healthy as u8)),
            slice_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_mode(&self, mode: Mode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub fn slice_count(&self) -> usize {
        self.slice_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for FlakySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Labels
    }

    fn ndim(&self) -> usize {
        self.inner.ndim()
    }

    fn extent(&self, axis: usize) -> Option<(usize, usize)> {
        self.inner.extent(axis)
    }

    async fn slice(&self, index: &SliceIndex) -> Result<ArrayData, SourceError> {
        self.slice_count.fetch_add(1, Ordering::SeqCst);
        match self.mode.load(Ordering::SeqCst) {
            1 => Err(SourceError::Compute("corrupt chunk".to_string())),
            2 => Err(SourceError::Unavailable("connection reset".to_string())),
            3 => panic!("source exploded"),
            _ => self.inner.slice(index).await,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Collect every event currently queued on `events`.
pub fn drain(events: &mut mpsc::UnboundedReceiver<SliceEvent>) -> Vec<SliceEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Collect the ready responses currently queued on `events`.
pub fn drain_ready(events: &mut mpsc::UnboundedReceiver<SliceEvent>) -> Vec<SliceResponse> {
    drain(events)
        .into_iter()
        .filter_map(|event| match event {
            SliceEvent::Ready(response) => Some(response),
            SliceEvent::Failed(_) => None,
        })
        .collect()
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
