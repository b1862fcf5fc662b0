//! # Handling: one execution of a handler against one event.
//!
//! ```text
//! start(id, event)
//!   ├─► activity.started(), on_subscribe
//!   ├─► handler(event).into_stream()         (panic → Failed)
//!   ├─► drain what is ready right now         (inside the triggering call)
//!   └─► pending remainder ──► tokio::spawn(drive)
//!                               loop select! {
//!                                 token.cancelled() → stop,
//!                                 stream.next()     → deliver / finish
//!                               }
//!
//! finish(id, outcome)
//!   ├─► remove record, Scheduler::finished(id)
//!   ├─► cancel token, drop stream (runs producer cleanup)
//!   ├─► on_complete | on_error | on_unsubscribe   (unrescued error → error stream + close)
//!   ├─► on_finalize, activity.ended()
//!   └─► launch whatever the scheduler released
//! ```
//!
//! A handling id is live from `start` until `finish`; every notification checks it,
//! so nothing reaches the observer after the terminal callback.
//!
//! `launch` is a trampoline: a start requested while another start is running on
//! the lane is queued and picked up by the outer loop, so a long queue of
//! synchronous handlings runs at constant stack depth.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::task::{Context, Poll};

use futures::{FutureExt, StreamExt, future};
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::policies::{HandlingId, Step};
use crate::work::WorkStream;

use super::lane::{Listener, Live, Slot};

/// How a handling ended.
#[derive(Debug)]
pub(super) enum Outcome {
    Completed,
    Failed(HandlerError),
    Canceled,
}

/// Clears the launching flag if a start unwinds.
struct Launching<'a, E, T>(&'a Listener<E, T>)
where
    E: Clone + Send + 'static,
    T: Send + 'static;

impl<E, T> Drop for Launching<'_, E, T>
where
    E: Clone + Send + 'static,
    T: Send + 'static,
{
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().launching = false;
        }
    }
}

impl<E, T> Listener<E, T>
where
    E: Clone + Send + 'static,
    T: Send + 'static,
{
    /// Starts `event`, or queues it for the loop already launching on this lane.
    pub(super) fn launch(&self, id: HandlingId, event: E) {
        {
            let mut state = self.lock();
            state.ready.push_back((id, event));
            if state.launching {
                return;
            }
            state.launching = true;
        }

        let _launching = Launching(self);
        loop {
            let next = {
                let mut state = self.lock();
                let next = state.ready.pop_front();
                state.launching = next.is_some();
                next
            };
            match next {
                Some((id, event)) => self.start(id, event),
                None => return,
            }
        }
    }

    fn start(&self, id: HandlingId, event: E) {
        let token = CancellationToken::new();
        let slot: Slot<T> = Arc::new(Mutex::new(None));
        {
            let mut state = self.lock();
            if state.closed {
                drop(state);
                return self.discard(event);
            }
            state.live.insert(
                id,
                Live {
                    event: event.clone(),
                    token: token.clone(),
                    slot: Arc::clone(&slot),
                },
            );
        }
        self.activity.started();
        if let Some(f) = &self.observer.subscribe {
            self.notify("subscribe", || f(&event));
            if !self.is_live(id) {
                return;
            }
        }

        let handler = Arc::clone(&self.handler);
        let mut stream = match catch_unwind(AssertUnwindSafe(|| handler(event).into_stream())) {
            Ok(stream) => stream,
            Err(panic) => return self.finish(id, Outcome::Failed(HandlerError::from_panic(panic))),
        };

        loop {
            if !self.is_live(id) {
                return;
            }
            match catch_unwind(AssertUnwindSafe(|| stream.next().now_or_never())) {
                Ok(None) => break,
                Ok(Some(Some(Ok(value)))) => self.deliver(id, value),
                Ok(Some(Some(Err(err)))) => return self.finish(id, Outcome::Failed(err)),
                Ok(Some(None)) => return self.finish(id, Outcome::Completed),
                Err(panic) => {
                    return self.finish(id, Outcome::Failed(HandlerError::from_panic(panic)));
                }
            }
        }

        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            let err = HandlerError::fail("asynchronous work requires a tokio runtime");
            return self.finish(id, Outcome::Failed(err));
        };
        {
            let mut held = lock_slot(&slot);
            if !self.is_live(id) {
                return;
            }
            *held = Some(stream);
        }
        if let Some(me) = self.me.upgrade() {
            rt.spawn(me.drive(id, slot, token));
        }
    }

    async fn drive(self: Arc<Self>, id: HandlingId, slot: Slot<T>, token: CancellationToken) {
        loop {
            let next = AssertUnwindSafe(future::poll_fn(|cx| poll_slot(&slot, cx))).catch_unwind();
            let polled = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                polled = next => polled,
            };
            match polled {
                Ok(Some(Ok(value))) => self.deliver(id, value),
                Ok(Some(Err(err))) => {
                    self.finish(id, Outcome::Failed(err));
                    break;
                }
                Ok(None) => {
                    self.finish(id, Outcome::Completed);
                    break;
                }
                Err(panic) => {
                    self.finish(id, Outcome::Failed(HandlerError::from_panic(panic)));
                    break;
                }
            }
        }
        let leftover = lock_slot(&slot).take();
        drop(leftover);
    }

    fn deliver(&self, id: HandlingId, value: T) {
        let Some(event) = self.live_event(id) else {
            return;
        };
        if let Some(f) = &self.observer.next {
            self.notify("next", || f(&event, value));
        }
    }

    pub(super) fn finish(&self, id: HandlingId, outcome: Outcome) {
        let (live, released) = {
            let mut state = self.lock();
            let Some(live) = state.live.remove(&id) else {
                return;
            };
            let released = state.scheduler.finished(id);
            (live, released)
        };
        live.token.cancel();
        drop(take_slot(&live.slot));

        let event = live.event;
        match outcome {
            Outcome::Completed => {
                if let Some(f) = &self.observer.complete {
                    self.notify("complete", || f(&event));
                }
            }
            Outcome::Canceled => {
                if let Some(f) = &self.observer.unsubscribe {
                    self.notify("unsubscribe", || f(&event));
                }
            }
            Outcome::Failed(err) if !self.observer.rescues() => {
                tracing::warn!(
                    bus = self.errors.name(),
                    policy = self.policy().as_label(),
                    error = err.as_label(),
                    "listener closed by unrescued error: {err}"
                );
                self.errors.publish(err);
                self.close();
            }
            Outcome::Failed(err) => {
                if let Some(f) = &self.observer.error {
                    self.notify("error", || f(&event, err));
                }
            }
        }
        if let Some(f) = &self.observer.finalize {
            self.notify("finalize", || f(&event));
        }
        self.activity.ended();

        if let Some(Step::Start(next, queued)) = released {
            self.launch(next, queued);
        }
    }
}

fn lock_slot<T>(slot: &Slot<T>) -> MutexGuard<'_, Option<WorkStream<T>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Takes the stream unless its driver is polling it right now.
fn take_slot<T>(slot: &Slot<T>) -> Option<WorkStream<T>> {
    match slot.try_lock() {
        Ok(mut held) => held.take(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
        Err(TryLockError::WouldBlock) => None,
    }
}

fn poll_slot<T>(slot: &Slot<T>, cx: &mut Context<'_>) -> Poll<Option<Result<T, HandlerError>>> {
    match lock_slot(slot).as_mut() {
        Some(stream) => stream.poll_next_unpin(cx),
        None => Poll::Ready(None),
    }
}
