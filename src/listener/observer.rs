//! # Observer: optional lifecycle callbacks of a listener.
//!
//! Every callback receives the event that started the handling, so a single
//! observer can tell concurrent handlings apart.
//!
//! ```text
//! on_subscribe ─► on_next* ─► on_complete ┐
//!                          ├► on_error    ├─► on_finalize
//!                          └► on_unsubscribe (canceled) ┘
//! ```
//!
//! An event the concurrency policy drops without ever starting a handling
//! (blocked, toggled off, replaced, or cleared from the queue) is reported
//! through `on_discard` alone.
//!
//! Supplying [`Observer::on_error`] makes the listener *rescue* handler errors:
//! they go to the callback and the listener keeps running. Without it the error
//! is published on the bus error stream and the listener closes.

use std::fmt;
use std::sync::Arc;

use crate::error::HandlerError;

type EventFn<E> = Arc<dyn Fn(&E) + Send + Sync>;
type NextFn<E, T> = Arc<dyn Fn(&E, T) + Send + Sync>;
type ErrorFn<E> = Arc<dyn Fn(&E, HandlerError) + Send + Sync>;

/// Set of optional lifecycle callbacks.
pub struct Observer<E, T> {
    pub(crate) subscribe: Option<EventFn<E>>,
    pub(crate) next: Option<NextFn<E, T>>,
    pub(crate) error: Option<ErrorFn<E>>,
    pub(crate) complete: Option<EventFn<E>>,
    pub(crate) unsubscribe: Option<EventFn<E>>,
    pub(crate) finalize: Option<EventFn<E>>,
    pub(crate) discard: Option<EventFn<E>>,
}

impl<E, T> Default for Observer<E, T> {
    fn default() -> Self {
        Self {
            subscribe: None,
            next: None,
            error: None,
            complete: None,
            unsubscribe: None,
            finalize: None,
            discard: None,
        }
    }
}

impl<E, T> Clone for Observer<E, T> {
    fn clone(&self) -> Self {
        Self {
            subscribe: self.subscribe.clone(),
            next: self.next.clone(),
            error: self.error.clone(),
            complete: self.complete.clone(),
            unsubscribe: self.unsubscribe.clone(),
            finalize: self.finalize.clone(),
            discard: self.discard.clone(),
        }
    }
}

impl<E, T> fmt::Debug for Observer<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("subscribe", &self.subscribe.is_some())
            .field("next", &self.next.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .field("unsubscribe", &self.unsubscribe.is_some())
            .field("finalize", &self.finalize.is_some())
            .field("discard", &self.discard.is_some())
            .finish()
    }
}

impl<E, T> Observer<E, T> {
    /// An observer with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a handling starts.
    pub fn on_subscribe(mut self, f: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.subscribe = Some(Arc::new(f));
        self
    }

    /// Called for every value the handling produces.
    pub fn on_next(mut self, f: impl Fn(&E, T) + Send + Sync + 'static) -> Self {
        self.next = Some(Arc::new(f));
        self
    }

    /// Called when the handling fails; rescues the listener.
    pub fn on_error(mut self, f: impl Fn(&E, HandlerError) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    /// Called when the handling completes.
    pub fn on_complete(mut self, f: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.complete = Some(Arc::new(f));
        self
    }

    /// Called when the handling is canceled.
    pub fn on_unsubscribe(mut self, f: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.unsubscribe = Some(Arc::new(f));
        self
    }

    /// Called after any terminal callback.
    pub fn on_finalize(mut self, f: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.finalize = Some(Arc::new(f));
        self
    }

    /// Called for an event the policy dropped without handling it.
    pub fn on_discard(mut self, f: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.discard = Some(Arc::new(f));
        self
    }

    /// Returns `true` if handler errors are absorbed by [`on_error`](Self::on_error).
    pub fn rescues(&self) -> bool {
        self.error.is_some()
    }
}
