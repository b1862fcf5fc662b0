//! # Activity counter with flicker-free "active" projection.
//!
//! Counts started-minus-terminated handlings of one listener and derives two
//! boolean signals from it:
//!
//! ```text
//! started() ──► count += 1 ──► handling = true, active = true
//! ended()   ──► count -= 1 ──► count == 0 ? handling = false
//!                                          └─► (one scheduler turn later)
//!                                               still 0 and no start since? active = false
//! ```
//!
//! ## Rules
//! - `count` never goes negative; `is_handling()` is `false` exactly when it is zero.
//! - `active` only lags on the falling edge; a handling started in the same turn
//!   keeps it `true` without an observable `false` in between.
//! - Without a tokio runtime the falling edge of `active` is applied immediately.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

#[derive(Debug, Default)]
struct Counter {
    count: usize,
    /// Bumped on every start; a pending settle only applies if it is unchanged.
    generation: u64,
}

#[derive(Debug)]
struct Inner {
    counter: Mutex<Counter>,
    handling: watch::Sender<bool>,
    active: watch::Sender<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Counter> {
        self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, generation: u64) {
        let counter = self.lock();
        if counter.count == 0 && counter.generation == generation {
            self.active.send_if_modified(|v| std::mem::replace(v, false));
        }
    }
}

/// Live activity of one listener.
///
/// Cloning is cheap; every clone observes the same counter.
#[derive(Clone, Debug)]
pub struct Activity {
    inner: Arc<Inner>,
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

impl Activity {
    /// Creates an idle counter.
    pub fn new() -> Self {
        let (handling, _) = watch::channel(false);
        let (active, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                counter: Mutex::new(Counter::default()),
                handling,
                active,
            }),
        }
    }

    pub(crate) fn started(&self) {
        let mut counter = self.inner.lock();
        counter.count += 1;
        counter.generation += 1;
        self.inner.handling.send_if_modified(|v| !std::mem::replace(v, true));
        self.inner.active.send_if_modified(|v| !std::mem::replace(v, true));
    }

    pub(crate) fn ended(&self) {
        let generation = {
            let mut counter = self.inner.lock();
            debug_assert!(counter.count > 0, "activity counter underflow");
            counter.count = counter.count.saturating_sub(1);
            if counter.count > 0 {
                return;
            }
            self.inner.handling.send_if_modified(|v| std::mem::replace(v, false));
            counter.generation
        };

        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let inner = Arc::clone(&self.inner);
                rt.spawn(async move {
                    tokio::task::yield_now().await;
                    inner.settle(generation);
                });
            }
            Err(_) => self.inner.settle(generation),
        }
    }

    /// Number of handlings currently in flight.
    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    /// `true` while at least one handling is in flight.
    pub fn is_handling(&self) -> bool {
        *self.inner.handling.borrow()
    }

    /// Like [`is_handling`](Self::is_handling), with the falling edge deferred by one turn.
    pub fn is_active(&self) -> bool {
        *self.inner.active.borrow()
    }

    /// Subscribes to changes of [`is_handling`](Self::is_handling).
    pub fn watch_handling(&self) -> watch::Receiver<bool> {
        self.inner.handling.subscribe()
    }

    /// Subscribes to changes of [`is_active`](Self::is_active).
    pub fn watch_active(&self) -> watch::Receiver<bool> {
        self.inner.active.subscribe()
    }
}
