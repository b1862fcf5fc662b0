//! # Error stream of a bus.
//!
//! [`ErrorStream`] is a thin wrapper around [`tokio::sync::broadcast`] carrying
//! every error no listener rescued: handler failures without an `on_error`
//! callback, panicking observer callbacks and failing reducers.
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks; it calls `broadcast::Sender::send`.
//! - **Bounded capacity**: a single ring buffer stores recent errors for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: errors are lost if there are no receivers at send time.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::HandlerError;

/// Broadcast channel for unrescued errors.
///
/// Cheap to clone; every clone publishes into the same ring buffer.
#[derive(Clone, Debug)]
pub(crate) struct ErrorStream {
    name: Arc<str>,
    tx: broadcast::Sender<HandlerError>,
}

impl ErrorStream {
    /// Creates a stream with the given capacity (clamped to at least 1).
    pub(crate) fn new(name: impl Into<Arc<str>>, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            tx,
        }
    }

    /// Name of the owning bus, for log fields.
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Publishes an error to all current receivers.
    pub(crate) fn publish(&self, err: HandlerError) {
        tracing::debug!(bus = %self.name, error = err.as_label(), "unrescued error: {err}");
        let _ = self.tx.send(err);
    }

    /// Creates a receiver observing subsequent errors.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<HandlerError> {
        self.tx.subscribe()
    }
}
