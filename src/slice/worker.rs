//! Bounded worker pool for slice computations.
//!
//! Every submitted request becomes one job; the slicer submits at most one
//! per layer at a time. Jobs run as tokio tasks but only `size` of them may
//! be inside a data source at any time; the rest wait for a permit. A job that obtains its permit after being superseded
//! returns without touching the source.
//!
//! Finished jobs report back over an unbounded completion channel that the
//! slicer drains on the control context. Workers never touch the cache or
//! the subscribers themselves.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, trace};

use crate::error::{ConfigError, SourceError};
use crate::source::DataSource;

use super::cache::SliceCacheKey;
use super::layer::RequestCounter;
use super::request::{LayerId, SliceData, SliceRequest};
use super::thumbnail::make_thumbnail;

/// Default worker count when the hardware concurrency is unknown.
const FALLBACK_WORKERS: usize = 4;

/// Worker count proportional to the available hardware concurrency.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_WORKERS)
}

// =============================================================================
// Completion
// =============================================================================

/// Result of one job.
#[derive(Debug)]
pub(crate) enum Outcome {
    Sliced(SliceData),
    Failed(SourceError),
    /// Superseded before the source was called
    Skipped,
}

/// Message sent from a finished job to the control context.
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) layer_id: LayerId,
    pub(crate) version: u64,
    pub(crate) key: SliceCacheKey,
    pub(crate) outcome: Outcome,
}

/// Everything a worker needs to compute one slice.
pub(crate) struct Job {
    pub(crate) request: SliceRequest,
    pub(crate) source: Arc<dyn DataSource>,
    pub(crate) counter: Arc<RequestCounter>,
    pub(crate) thumbnail_size: Option<u32>,
}

impl Job {
    async fn run(self) -> Completion {
        let Job {
            request,
            source,
            counter,
            thumbnail_size,
        } = self;
        let key = request.cache_key();

        let outcome = if counter.latest() != request.version {
            trace!(layer = %request.layer_id, version = request.version, "skipping superseded request");
            Outcome::Skipped
        } else {
            let kind = source.kind();
            let index = request.index.clone();
            // a panicking source must not take the worker down with it
            let computed = tokio::spawn(async move { source.slice(&index).await }).await;
            match computed {
                Ok(Ok(data)) => {
                    let thumbnail = thumbnail_size
                        .filter(|_| kind.has_thumbnail())
                        .and_then(|size| make_thumbnail(&data, size));
                    Outcome::Sliced(SliceData::new(data, thumbnail))
                }
                Ok(Err(err)) => Outcome::Failed(err),
                Err(join_err) => Outcome::Failed(SourceError::Compute(format!(
                    "source task aborted: {}",
                    join_err
                ))),
            }
        };

        Completion {
            layer_id: request.layer_id,
            version: request.version,
            key,
            outcome,
        }
    }
}

// =============================================================================
// Worker Pool
// =============================================================================

/// Semaphore-bounded pool executing slice jobs.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    /// Maximum number of concurrent source calls.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently idle.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Queue a job; its completion is sent on `completions`.
    pub(crate) fn submit(&self, job: Job, completions: mpsc::UnboundedSender<Completion>) {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let layer_id = job.request.layer_id;
            let version = job.request.version;
            let completion = match permits.acquire_owned().await {
                Ok(_permit) => job.run().await,
                Err(_) => Completion {
                    layer_id,
                    version,
                    key: job.request.cache_key(),
                    outcome: Outcome::Skipped,
                },
            };
            if completions.send(completion).is_err() {
                debug!(layer = %layer_id, version, "slicer dropped, discarding completion");
            }
        });
    }
}
