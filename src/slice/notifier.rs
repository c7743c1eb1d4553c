//! Delivery of accepted slices and errors to external consumers.
//!
//! Subscribers receive [`SliceEvent`]s over unbounded channels, so publishing
//! never blocks the control context. Failures are additionally handed to an
//! [`ErrorSink`]. The notifier remembers the highest version published per
//! layer and refuses anything older.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::request::{LayerId, SliceEvent, SliceFailure};

// =============================================================================
// Error Sink
// =============================================================================

/// External reporting sink for slice failures.
pub trait ErrorSink: Send + Sync {
    fn report(&self, failure: &SliceFailure);
}

/// Default sink: logs every failure at `warn` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, failure: &SliceFailure) {
        warn!(
            layer = %failure.layer_id,
            version = failure.version,
            kind = %failure.kind,
            "slice failed: {}",
            failure.message
        );
    }
}

// =============================================================================
// Notifier
// =============================================================================

/// Fan-out of slice events.
pub struct Notifier {
    subscribers: Vec<mpsc::UnboundedSender<SliceEvent>>,
    sink: Arc<dyn ErrorSink>,
    published: HashMap<LayerId, u64>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::with_error_sink(Arc::new(TracingErrorSink))
    }

    pub fn with_error_sink(sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            subscribers: Vec::new(),
            sink,
            published: HashMap::new(),
        }
    }

    pub fn set_error_sink(&mut self, sink: Arc<dyn ErrorSink>) {
        self.sink = sink;
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SliceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Publish an event.
    ///
    /// Returns `false` if the event is older than one already published for
    /// the same layer, in which case nobody sees it.
    pub fn publish(&mut self, event: SliceEvent) -> bool {
        let layer_id = event.layer_id();
        let version = event.version();

        let last = self.published.entry(layer_id).or_insert(version);
        if version < *last {
            trace!(layer = %layer_id, version, last = *last, "dropping out-of-order event");
            return false;
        }
        *last = version;

        if let SliceEvent::Failed(failure) = &event {
            self.sink.report(failure);
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        true
    }

    /// Highest version published for `layer_id`.
    pub fn last_published(&self, layer_id: LayerId) -> Option<u64> {
        self.published.get(&layer_id).copied()
    }

    /// Drop bookkeeping for a removed layer.
    pub fn forget(&mut self, layer_id: LayerId) {
        self.published.remove(&layer_id);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
