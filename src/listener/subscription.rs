//! Handle returned by [`Bus::listen`](crate::Bus::listen).

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use super::Activity;

/// Type-erased control surface of a listener.
pub(crate) trait Control: Send + Sync {
    fn close(&self);
    fn is_closed(&self) -> bool;
    fn cancel_current(&self);
    fn cancel_current_and_queued(&self);
    fn pending(&self) -> usize;
    fn activity(&self) -> &Activity;
}

/// Entry point the bus dispatches matched events into.
pub(crate) trait Accept<E>: Control {
    fn accept(&self, event: E);
}

/// Handle to a registered listener.
///
/// Dropping the handle does **not** unsubscribe; call [`cancel`](Self::cancel).
/// Clones control the same listener.
#[derive(Clone)]
pub struct Subscription {
    control: Arc<dyn Control>,
}

impl Subscription {
    pub(crate) fn new(control: Arc<dyn Control>) -> Self {
        Self { control }
    }

    /// Unsubscribes the listener and cancels its live handlings. Idempotent.
    pub fn cancel(&self) {
        self.control.close();
    }

    /// `true` once the listener was canceled, reset, or closed by an unrescued error.
    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    /// `true` while at least one handling is in flight.
    pub fn is_handling(&self) -> bool {
        self.control.activity().is_handling()
    }

    /// Flicker-free variant of [`is_handling`](Self::is_handling).
    pub fn is_active(&self) -> bool {
        self.control.activity().is_active()
    }

    pub fn watch_handling(&self) -> watch::Receiver<bool> {
        self.control.activity().watch_handling()
    }

    pub fn watch_active(&self) -> watch::Receiver<bool> {
        self.control.activity().watch_active()
    }

    /// Number of events queued behind the active handling.
    pub fn pending(&self) -> usize {
        self.control.pending()
    }

    /// Cancels the active handlings; queued events may start afterwards.
    pub fn cancel_current(&self) {
        self.control.cancel_current();
    }

    /// Discards queued events and cancels the active handlings.
    pub fn cancel_current_and_queued(&self) {
        self.control.cancel_current_and_queued();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .field("handling", &self.control.activity().count())
            .field("pending", &self.pending())
            .finish()
    }
}
