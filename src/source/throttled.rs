//! Latency adapter for data sources.
//!
//! Wraps any source and sleeps before every `slice()` call. Useful to emulate
//! disk or network backed data when benchmarking scrubbing behaviour.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SourceError;

use super::data::ArrayData;
use super::{DataSource, SliceIndex, SourceKind};

/// A source that delays every slice by a fixed duration.
#[derive(Debug, Clone)]
pub struct Throttled<S> {
    inner: S,
    delay: Duration,
}

impl<S: DataSource> Throttled<S> {
    pub fn new(inner: S, delay: Duration) -> Self {
        Self { inner, delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: DataSource> DataSource for Throttled<S> {
    fn kind(&self) -> SourceKind {
        self.inner.kind()
    }

    fn ndim(&self) -> usize {
        self.inner.ndim()
    }

    fn extent(&self, axis: usize) -> Option<(usize, usize)> {
        self.inner.extent(axis)
    }

    fn level_count(&self) -> usize {
        self.inner.level_count()
    }

    async fn slice(&self, index: &SliceIndex) -> Result<ArrayData, SourceError> {
        tokio::time::sleep(self.delay).await;
        self.inner.slice(index).await
    }

    fn supports_cancel(&self) -> bool {
        self.inner.supports_cancel()
    }

    fn cancel(&self, index: &SliceIndex) {
        self.inner.cancel(index)
    }
}
