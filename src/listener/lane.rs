//! # Listener: a concurrency-governed lane of handlings.
//!
//! A [`Listener`] receives already-matched events through [`Listener::accept`],
//! asks its [`Scheduler`] what to do with them and applies the resulting steps.
//! It does not know about the bus; the bus only feeds it.
//!
//! ## Architecture
//! ```text
//! accept(event) ──► Scheduler::trigger ──► Cancel(id) ──► finish(id, Canceled)
//!                                      ├─► Start(id)  ──► launch(id, event)
//!                                      └─► Discard    ──► on_discard(event)
//!                                                           │
//! finish(id, outcome) ◄─── handling ends ◄──────────────────┘
//!      └─► Scheduler::finished(id) ──► Start(next) ──► launch(next, queued)
//! ```
//!
//! ## Rules
//! - User code (handler, observer, producer) never runs while the state lock is held.
//! - An unrescued error closes the listener permanently.
//! - A closed listener ignores events and cancels every live handling.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio_util::sync::CancellationToken;

use crate::bus::ErrorStream;
use crate::error::HandlerError;
use crate::listener::{Accept, Activity, Control, Observer};
use crate::policies::{Concurrency, HandlingId, Scheduler, Step};
use crate::work::{Work, WorkStream};

use super::handling::Outcome;

/// Handler mapping one event to its work.
type HandlerFn<E, T> = Arc<dyn Fn(E) -> Work<T> + Send + Sync>;

/// Work of a handling once it went asynchronous.
pub(super) type Slot<T> = Arc<Mutex<Option<WorkStream<T>>>>;

/// Book-keeping for one handling in flight.
pub(super) struct Live<E, T> {
    pub(super) event: E,
    pub(super) token: CancellationToken,
    pub(super) slot: Slot<T>,
}

pub(super) struct State<E, T> {
    pub(super) scheduler: Scheduler<E>,
    pub(super) live: HashMap<HandlingId, Live<E, T>>,
    /// Starts waiting for the thread that is already launching.
    pub(super) ready: VecDeque<(HandlingId, E)>,
    pub(super) launching: bool,
    pub(super) closed: bool,
}

/// Lane of handlings for one registration.
pub(crate) struct Listener<E, T> {
    pub(super) me: Weak<Self>,
    pub(super) handler: HandlerFn<E, T>,
    pub(super) observer: Observer<E, T>,
    pub(super) errors: ErrorStream,
    pub(super) activity: Activity,
    pub(super) state: Mutex<State<E, T>>,
}

impl<E, T> Listener<E, T>
where
    E: Clone + Send + 'static,
    T: Send + 'static,
{
    /// Creates an idle listener.
    pub(crate) fn new(
        handler: HandlerFn<E, T>,
        observer: Observer<E, T>,
        policy: Concurrency,
        errors: ErrorStream,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            handler,
            observer,
            errors,
            activity: Activity::new(),
            state: Mutex::new(State {
                scheduler: Scheduler::new(policy),
                live: HashMap::new(),
                ready: VecDeque::new(),
                launching: false,
                closed: false,
            }),
        })
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, State<E, T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feeds one matched event into the lane.
    pub(crate) fn accept(&self, event: E) {
        let steps = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.scheduler.trigger(event)
        };
        for step in steps {
            match step {
                Step::Cancel(id) => self.finish(id, Outcome::Canceled),
                Step::Start(id, event) => self.launch(id, event),
                Step::Discard(event) => self.discard(event),
            }
        }
    }

    pub(super) fn discard(&self, event: E) {
        if let Some(f) = &self.observer.discard {
            self.notify("discard", || f(&event));
        }
    }

    /// Cancels the active handlings; queued events may start afterwards.
    pub(crate) fn cancel_current(&self) {
        let ids = self.lock().scheduler.running();
        for id in ids {
            self.finish(id, Outcome::Canceled);
        }
    }

    /// Discards queued events, then cancels the active handlings.
    pub(crate) fn cancel_current_and_queued(&self) {
        let (dropped, ids) = {
            let mut state = self.lock();
            (state.scheduler.clear_pending(), state.scheduler.running())
        };
        for event in dropped {
            self.discard(event);
        }
        for id in ids {
            self.finish(id, Outcome::Canceled);
        }
    }

    /// Closes the lane for good. Idempotent.
    pub(crate) fn close(&self) {
        let (dropped, ids) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let mut ids: Vec<HandlingId> = state.live.keys().copied().collect();
            ids.sort_unstable();
            (state.scheduler.clear_pending(), ids)
        };
        for event in dropped {
            self.discard(event);
        }
        for id in ids {
            self.finish(id, Outcome::Canceled);
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(super) fn policy(&self) -> Concurrency {
        self.lock().scheduler.policy()
    }

    pub(super) fn is_live(&self, id: HandlingId) -> bool {
        self.lock().live.contains_key(&id)
    }

    pub(super) fn live_event(&self, id: HandlingId) -> Option<E> {
        self.lock().live.get(&id).map(|live| live.event.clone())
    }

    /// Runs an observer callback, reporting a panic on the error stream.
    pub(super) fn notify(&self, callback: &'static str, f: impl FnOnce()) {
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(f)) {
            let err = HandlerError::from_panic(panic);
            tracing::warn!(
                bus = self.errors.name(),
                policy = self.policy().as_label(),
                callback,
                "observer callback panicked: {err}"
            );
            self.errors.publish(err);
        }
    }
}

impl<E, T> Control for Listener<E, T>
where
    E: Clone + Send + 'static,
    T: Send + 'static,
{
    fn close(&self) {
        Listener::close(self);
    }

    fn is_closed(&self) -> bool {
        Listener::is_closed(self)
    }

    fn cancel_current(&self) {
        Listener::cancel_current(self);
    }

    fn cancel_current_and_queued(&self) {
        Listener::cancel_current_and_queued(self);
    }

    fn pending(&self) -> usize {
        self.lock().scheduler.pending()
    }

    fn activity(&self) -> &Activity {
        &self.activity
    }
}

impl<E, T> Accept<E> for Listener<E, T>
where
    E: Clone + Send + 'static,
    T: Send + 'static,
{
    fn accept(&self, event: E) {
        Listener::accept(self, event);
    }
}
