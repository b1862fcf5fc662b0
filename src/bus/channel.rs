//! # Bus: ordered, synchronous event dispatch.
//!
//! ```text
//! trigger(event)
//!   ├─► guards   (registration order; first failure → Err(Guard), nothing published)
//!   ├─► filters  (replace or drop the event; failure → Err(Filter))
//!   ├─► spies
//!   └─► dispatch queue ──► drained one event at a time:
//!                            ├─► queries / next_event taps
//!                            └─► listeners (registration order) → Listener::accept
//! ```
//!
//! Every trigger lands in the same queue. A trigger issued while the queue is being
//! drained (from a listener, or from another thread) is appended and delivered after
//! the current event reached every listener, so all listeners observe triggers in
//! call order.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{broadcast, mpsc};

use crate::config::Config;
use crate::error::{BusError, HandlerError};
use crate::listener::{Accept, Listener, Observer, Subscription};
use crate::policies::Concurrency;
use crate::work::Work;

use super::errors::ErrorStream;
use super::hooks::{Filter, Guard, Hooks, Matcher, Registration, Spy};
use super::query::Query;

struct Entry<E> {
    matcher: Matcher<E>,
    listener: Arc<dyn Accept<E>>,
}

struct Tap<E> {
    id: u64,
    matcher: Matcher<E>,
    tx: mpsc::UnboundedSender<E>,
    once: bool,
}

impl<E> Clone for Entry<E> {
    fn clone(&self) -> Self {
        Self {
            matcher: Arc::clone(&self.matcher),
            listener: Arc::clone(&self.listener),
        }
    }
}

impl<E> Clone for Tap<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            matcher: Arc::clone(&self.matcher),
            tx: self.tx.clone(),
            once: self.once,
        }
    }
}

struct Registry<E> {
    hooks: Hooks<E>,
    listeners: Vec<Entry<E>>,
    taps: Vec<Tap<E>>,
}

struct Queue<E> {
    pending: VecDeque<E>,
    draining: bool,
}

struct Inner<E> {
    config: Config,
    errors: ErrorStream,
    next_id: AtomicU64,
    registry: Mutex<Registry<E>>,
    queue: Mutex<Queue<E>>,
}

impl<E> Inner<E> {
    fn registry(&self) -> MutexGuard<'_, Registry<E>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self) -> MutexGuard<'_, Queue<E>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Releases the drain flag if dispatch unwinds.
struct Draining<'a, E>(&'a Inner<E>);

impl<E> Drop for Draining<'_, E> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.queue().draining = false;
        }
    }
}

/// In-process event bus.
///
/// Cheap to clone; all clones share the same registrations.
pub struct Bus<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for Bus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for Bus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.inner.config.name)
            .finish_non_exhaustive()
    }
}

/// Non-owning reference to a [`Bus`].
pub struct WeakBus<E> {
    inner: Weak<Inner<E>>,
}

impl<E> Clone for WeakBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<E> WeakBus<E> {
    /// Returns the bus if it is still alive.
    pub fn upgrade(&self) -> Option<Bus<E>> {
        self.inner.upgrade().map(|inner| Bus { inner })
    }
}

impl<E> fmt::Debug for WeakBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakBus")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<E> Default for Bus<E>
where
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Bus<E>
where
    E: Clone + Send + 'static,
{
    /// Creates a bus with [`Config::default`].
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let errors = ErrorStream::new(config.name.clone(), config.error_capacity_clamped());
        Self {
            inner: Arc::new(Inner {
                config,
                errors,
                next_id: AtomicU64::new(0),
                registry: Mutex::new(Registry {
                    hooks: Hooks::default(),
                    listeners: Vec::new(),
                    taps: Vec::new(),
                }),
                queue: Mutex::new(Queue {
                    pending: VecDeque::new(),
                    draining: false,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakBus<E> {
        WeakBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribes to errors no listener rescued.
    pub fn errors(&self) -> broadcast::Receiver<HandlerError> {
        self.inner.errors.subscribe()
    }

    pub(crate) fn error_stream(&self) -> &ErrorStream {
        &self.inner.errors
    }

    /// Publishes an event.
    ///
    /// Guards, filters and spies run before this returns, and so does every
    /// listener unless this call is nested inside another dispatch.
    ///
    /// # Errors
    /// [`BusError::Guard`] or [`BusError::Filter`] when a hook rejects the event;
    /// nothing downstream of the failing hook observes it. Listener failures are
    /// never returned here.
    pub fn trigger(&self, event: E) -> Result<(), BusError> {
        let hooks = self.inner.registry().hooks.clone();

        for guard in &hooks.guards {
            if (guard.matcher)(&event) {
                (guard.check)(&event).map_err(|source| BusError::Guard { source })?;
            }
        }

        let mut event = event;
        for filter in &hooks.filters {
            if !(filter.matcher)(&event) {
                continue;
            }
            match (filter.apply)(event) {
                Ok(Some(next)) => event = next,
                Ok(None) => return Ok(()),
                Err(source) => return Err(BusError::Filter { source }),
            }
        }

        for spy in &hooks.spies {
            (spy.observe)(&event);
        }

        self.publish(event);
        Ok(())
    }

    fn publish(&self, event: E) {
        {
            let mut queue = self.inner.queue();
            queue.pending.push_back(event);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }

        let _draining = Draining(&self.inner);
        loop {
            let next = {
                let mut queue = self.inner.queue();
                let next = queue.pending.pop_front();
                // Cleared under the same lock as the empty check.
                queue.draining = next.is_some();
                next
            };
            match next {
                Some(event) => self.dispatch(event),
                None => break,
            }
        }
    }

    fn dispatch(&self, event: E) {
        let (taps, listeners) = {
            let mut registry = self.inner.registry();
            registry.taps.retain(|tap| !tap.tx.is_closed());
            (registry.taps.clone(), registry.listeners.clone())
        };

        let mut fired = Vec::new();
        for tap in &taps {
            if self.matches(&tap.matcher, &event) && tap.tx.send(event.clone()).is_ok() && tap.once {
                fired.push(tap.id);
            }
        }
        if !fired.is_empty() {
            self.inner.registry().taps.retain(|tap| !fired.contains(&tap.id));
        }

        for entry in &listeners {
            if !entry.listener.is_closed() && self.matches(&entry.matcher, &event) {
                entry.listener.accept(event.clone());
            }
        }
    }

    /// Runs a listener-side matcher; a panicking matcher counts as no match.
    fn matches(&self, matcher: &Matcher<E>, event: &E) -> bool {
        match catch_unwind(AssertUnwindSafe(|| matcher(event))) {
            Ok(matched) => matched,
            Err(panic) => {
                let err = HandlerError::from_panic(panic);
                tracing::warn!(bus = self.name(), "matcher panicked: {err}");
                self.inner.errors.publish(err);
                false
            }
        }
    }

    /// Registers a listener running `handler` for every matching event under `policy`.
    ///
    /// Values produced by the handler go to `observer`. Without an `on_error`
    /// callback a failing handling closes the listener and its error is published
    /// on [`errors`](Self::errors).
    pub fn listen<T, M, H>(
        &self,
        matcher: M,
        handler: H,
        observer: Observer<E, T>,
        policy: Concurrency,
    ) -> Subscription
    where
        T: Send + 'static,
        M: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(E) -> Work<T> + Send + Sync + 'static,
    {
        let listener = Listener::new(
            Arc::new(handler),
            observer,
            policy,
            self.inner.errors.clone(),
        );
        self.attach(matcher, listener.clone());
        Subscription::new(listener)
    }

    /// Registers an already built lane; [`reset`](Self::reset) closes it like any listener.
    pub(crate) fn attach<M>(&self, matcher: M, listener: Arc<dyn Accept<E>>)
    where
        M: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let mut registry = self.inner.registry();
        registry.listeners.retain(|entry| !entry.listener.is_closed());
        registry.listeners.push(Entry {
            matcher: Arc::new(matcher),
            listener,
        });
    }

    /// [`listen`](Self::listen) with [`Concurrency::Queueing`].
    pub fn listen_queueing<T, M, H>(&self, matcher: M, handler: H, observer: Observer<E, T>) -> Subscription
    where
        T: Send + 'static,
        M: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(E) -> Work<T> + Send + Sync + 'static,
    {
        self.listen(matcher, handler, observer, Concurrency::Queueing)
    }

    /// [`listen`](Self::listen) with [`Concurrency::Switching`].
    pub fn listen_switching<T, M, H>(&self, matcher: M, handler: H, observer: Observer<E, T>) -> Subscription
    where
        T: Send + 'static,
        M: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(E) -> Work<T> + Send + Sync + 'static,
    {
        self.listen(matcher, handler, observer, Concurrency::Switching)
    }

    /// [`listen`](Self::listen) with [`Concurrency::Blocking`].
    pub fn listen_blocking<T, M, H>(&self, matcher: M, handler: H, observer: Observer<E, T>) -> Subscription
    where
        T: Send + 'static,
        M: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(E) -> Work<T> + Send + Sync + 'static,
    {
        self.listen(matcher, handler, observer, Concurrency::Blocking)
    }

    /// [`listen`](Self::listen) with [`Concurrency::Toggling`].
    pub fn listen_toggling<T, M, H>(&self, matcher: M, handler: H, observer: Observer<E, T>) -> Subscription
    where
        T: Send + 'static,
        M: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(E) -> Work<T> + Send + Sync + 'static,
    {
        self.listen(matcher, handler, observer, Concurrency::Toggling)
    }

    /// [`listen`](Self::listen) with [`Concurrency::QueueOnlyLatest`].
    pub fn listen_queue_only_latest<T, M, H>(
        &self,
        matcher: M,
        handler: H,
        observer: Observer<E, T>,
    ) -> Subscription
    where
        T: Send + 'static,
        M: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(E) -> Work<T> + Send + Sync + 'static,
    {
        self.listen(matcher, handler, observer, Concurrency::QueueOnlyLatest)
    }

    /// [`listen`](Self::listen) with [`Concurrency::ThresholdToggle`] flipping every `hits` triggers.
    pub fn listen_threshold_toggle<T, M, H>(
        &self,
        hits: u32,
        matcher: M,
        handler: H,
        observer: Observer<E, T>,
    ) -> Subscription
    where
        T: Send + 'static,
        M: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(E) -> Work<T> + Send + Sync + 'static,
    {
        self.listen(matcher, handler, observer, Concurrency::ThresholdToggle { hits })
    }

    /// Registers a guard; an `Err` from `check` aborts the trigger that caused it.
    pub fn guard<M, F>(&self, matcher: M, check: F) -> Registration
    where
        M: Fn(&E) -> bool + Send + Sync + 'static,
        F: Fn(&E) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.inner.allocate();
        self.inner.registry().hooks.guards.push(Guard {
            id,
            matcher: Arc::new(matcher),
            check: Arc::new(check),
        });
        self.detach(id)
    }

    /// Registers a filter that may replace (`Some`) or drop (`None`) matching events.
    pub fn filter<M, F>(&self, matcher: M, apply: F) -> Registration
    where
        M: Fn(&E) -> bool + Send + Sync + 'static,
        F: Fn(E) -> Result<Option<E>, HandlerError> + Send + Sync + 'static,
    {
        let id = self.inner.allocate();
        self.inner.registry().hooks.filters.push(Filter {
            id,
            matcher: Arc::new(matcher),
            apply: Arc::new(apply),
        });
        self.detach(id)
    }

    /// Registers a spy seeing every event that passed guards and filters.
    pub fn spy<F>(&self, observe: F) -> Registration
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.allocate();
        self.inner.registry().hooks.spies.push(Spy {
            id,
            observe: Arc::new(observe),
        });
        self.detach(id)
    }

    fn detach(&self, id: u64) -> Registration {
        let weak = Arc::downgrade(&self.inner);
        Registration::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.registry().hooks.remove(id);
            }
        })
    }

    /// Streams every future event accepted by `matcher`.
    pub fn query<M>(&self, matcher: M) -> Query<E>
    where
        M: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Query::new(self.tap(Arc::new(matcher), false))
    }

    /// Resolves with the first future event accepted by `matcher`.
    ///
    /// The matcher is registered when this is called, not when the future is
    /// first polled.
    ///
    /// # Errors
    /// [`BusError::Reset`] if the bus is reset (or dropped) first.
    pub fn next_event<M>(&self, matcher: M) -> impl Future<Output = Result<E, BusError>> + Send + 'static
    where
        M: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let mut rx = self.tap(Arc::new(matcher), true);
        async move { rx.recv().await.ok_or(BusError::Reset) }
    }

    fn tap(&self, matcher: Matcher<E>, once: bool) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.allocate();
        self.inner.registry().taps.push(Tap {
            id,
            matcher,
            tx,
            once,
        });
        rx
    }

    /// Returns the bus to its freshly constructed state.
    ///
    /// Removes every hook, closes every listener (canceling its handlings), ends every
    /// query and fails every pending [`next_event`](Self::next_event). Events still
    /// waiting in the dispatch queue are discarded.
    pub fn reset(&self) {
        let (listeners, taps) = {
            let mut registry = self.inner.registry();
            registry.hooks.clear();
            (
                std::mem::take(&mut registry.listeners),
                std::mem::take(&mut registry.taps),
            )
        };
        let discarded = {
            let mut queue = self.inner.queue();
            let n = queue.pending.len();
            queue.pending.clear();
            n
        };
        tracing::debug!(
            bus = self.name(),
            listeners = listeners.len(),
            queries = taps.len(),
            discarded,
            "bus reset"
        );
        drop(taps);
        for entry in listeners {
            entry.listener.close();
        }
    }

    /// Number of listeners that are still open.
    pub fn listener_count(&self) -> usize {
        let mut registry = self.inner.registry();
        registry.listeners.retain(|entry| !entry.listener.is_closed());
        registry.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures::StreamExt;
    use tokio::time::sleep;

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(log: &Log, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn all(_: &u32) -> bool {
        true
    }

    /// Observer recording `started/next/complete/error/canceled` per event.
    fn recorder(log: &Log) -> Observer<u32, u32> {
        let (a, b, c, d, e) = (log.clone(), log.clone(), log.clone(), log.clone(), log.clone());
        Observer::<u32, u32>::new()
            .on_subscribe(move |ev| push(&a, format!("started({ev})")))
            .on_next(move |ev, v| push(&b, format!("next({ev})={v}")))
            .on_complete(move |ev| push(&c, format!("complete({ev})")))
            .on_error(move |ev, err| push(&d, format!("error({ev})={}", err.as_label())))
            .on_unsubscribe(move |ev| push(&e, format!("canceled({ev})")))
    }

    fn after(ms: u64, v: u32) -> Work<u32> {
        Work::future(async move {
            sleep(Duration::from_millis(ms)).await;
            v
        })
    }

    #[test]
    fn test_listeners_observe_reentrant_triggers_in_call_order() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();

        let (bus2, first) = (bus.clone(), seen.clone());
        let _a = bus.listen(
            all,
            move |ev| {
                push(&first, format!("a:{ev}"));
                if ev == 1 {
                    bus2.trigger(2).unwrap();
                    bus2.trigger(3).unwrap();
                }
                Work::<()>::none()
            },
            Observer::new(),
            Concurrency::Immediate,
        );
        let second = seen.clone();
        let _b = bus.listen(
            all,
            move |ev| {
                push(&second, format!("b:{ev}"));
                Work::<()>::none()
            },
            Observer::new(),
            Concurrency::Immediate,
        );

        bus.trigger(1).unwrap();
        assert_eq!(entries(&seen), ["a:1", "b:1", "a:2", "b:2", "a:3", "b:3"]);
    }

    #[test]
    fn test_filter_can_drop_or_replace_events() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();

        let _odd = bus.filter(|ev| ev % 2 == 1, |_| Ok(None));
        let _double = bus.filter(|ev| *ev >= 10, |ev| Ok(Some(ev * 2)));
        let spied = seen.clone();
        let _spy = bus.spy(move |ev| push(&spied, format!("spy:{ev}")));
        let heard = seen.clone();
        let _l = bus.listen(
            all,
            move |ev| {
                push(&heard, format!("listen:{ev}"));
                Work::<()>::none()
            },
            Observer::new(),
            Concurrency::Immediate,
        );

        bus.trigger(3).unwrap();
        bus.trigger(4).unwrap();
        bus.trigger(10).unwrap();
        assert_eq!(
            entries(&seen),
            ["spy:4", "listen:4", "spy:20", "listen:20"]
        );
    }

    #[test]
    fn test_guard_failure_reaches_caller_and_stays_registered() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();
        let guard = bus.guard(
            |ev| *ev > 100,
            |ev| Err(HandlerError::fail(format!("{ev} too large"))),
        );
        let heard = seen.clone();
        let _l = bus.listen(
            all,
            move |ev| {
                push(&heard, ev.to_string());
                Work::<()>::none()
            },
            Observer::new(),
            Concurrency::Immediate,
        );

        let err = bus.trigger(101).unwrap_err();
        assert!(err.is_trigger_failure());
        assert_eq!(err.as_label(), "bus_guard_rejected");
        assert!(bus.trigger(102).is_err());
        bus.trigger(5).unwrap();

        guard.cancel();
        guard.cancel();
        bus.trigger(103).unwrap();
        assert_eq!(entries(&seen), ["5", "103"]);
    }

    #[test]
    fn test_filter_failure_is_returned() {
        let bus: Bus<u32> = Bus::new();
        let _f = bus.filter(all, |_| Err(HandlerError::fail("nope")));
        assert!(matches!(bus.trigger(1), Err(BusError::Filter { .. })));
    }

    #[test]
    fn test_unrescued_error_closes_only_that_listener() {
        let bus: Bus<u32> = Bus::new();
        let mut errors = bus.errors();
        let seen = log();

        let failing = bus.listen(
            all,
            |_| -> Work<()> { panic!("sync boom") },
            Observer::new(),
            Concurrency::Immediate,
        );
        let heard = seen.clone();
        let healthy = bus.listen(
            all,
            move |ev| {
                push(&heard, ev.to_string());
                Work::<()>::none()
            },
            Observer::new(),
            Concurrency::Immediate,
        );

        bus.trigger(1).unwrap();
        bus.trigger(2).unwrap();

        assert!(failing.is_closed());
        assert!(!healthy.is_closed());
        assert_eq!(entries(&seen), ["1", "2"]);
        assert_eq!(errors.try_recv().unwrap().as_label(), "handler_panicked");
        assert!(errors.try_recv().is_err());
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_rescued_listener_keeps_listening() {
        let bus: Bus<u32> = Bus::new();
        let mut errors = bus.errors();
        let seen = log();

        let sub = bus.listen(
            all,
            |ev| {
                if ev == 1 {
                    Work::fail(HandlerError::fail("odd one"))
                } else {
                    Work::value(ev * 10)
                }
            },
            recorder(&seen),
            Concurrency::Immediate,
        );

        bus.trigger(1).unwrap();
        bus.trigger(2).unwrap();

        assert!(!sub.is_closed());
        assert_eq!(
            entries(&seen),
            [
                "started(1)",
                "error(1)=handler_failed",
                "started(2)",
                "next(2)=20",
                "complete(2)"
            ]
        );
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_panicking_matcher_counts_as_no_match() {
        let bus: Bus<u32> = Bus::new();
        let mut errors = bus.errors();
        let _l = bus.listen(
            |_: &u32| -> bool { panic!("bad matcher") },
            |_| Work::<()>::none(),
            Observer::new(),
            Concurrency::Immediate,
        );
        bus.trigger(1).unwrap();
        assert_eq!(errors.try_recv().unwrap().as_label(), "handler_panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_everything() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();
        let sub = bus.listen(all, |ev| after(10, ev), recorder(&seen), Concurrency::Immediate);
        let mut query = bus.query(all);
        let pending = bus.next_event(|ev| *ev == 99);
        let _spy = bus.spy(|_| {});

        bus.trigger(1).unwrap();
        assert_eq!(query.try_next(), Some(1));
        assert!(sub.is_handling());

        bus.reset();
        sleep(Duration::from_millis(20)).await;

        assert!(sub.is_closed());
        assert!(!sub.is_handling());
        assert_eq!(entries(&seen), ["started(1)", "canceled(1)"]);
        assert_eq!(query.next().await, None);
        assert_eq!(pending.await, Err(BusError::Reset));

        bus.trigger(2).unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(entries(&seen).len(), 2);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_next_event_resolves_once() {
        let bus: Bus<u32> = Bus::new();
        let first = bus.next_event(|ev| *ev > 1);
        bus.trigger(1).unwrap();
        bus.trigger(2).unwrap();
        bus.trigger(3).unwrap();
        assert_eq!(first.await, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queueing_runs_one_after_another() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();
        let sub = bus.listen_queueing(all, |ev| after(10, ev), recorder(&seen));

        bus.trigger(1).unwrap();
        bus.trigger(2).unwrap();
        assert_eq!(sub.pending(), 1);

        sleep(Duration::from_millis(15)).await;
        assert_eq!(
            entries(&seen),
            ["started(1)", "next(1)=1", "complete(1)", "started(2)"]
        );

        sleep(Duration::from_millis(10)).await;
        assert_eq!(&entries(&seen)[4..], ["next(2)=2", "complete(2)"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_cancels_the_active_handling() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();
        let _sub = bus.listen_switching(all, |ev| after(10, ev), recorder(&seen));

        bus.trigger(1).unwrap();
        bus.trigger(2).unwrap();
        sleep(Duration::from_millis(30)).await;

        assert_eq!(
            entries(&seen),
            [
                "started(1)",
                "canceled(1)",
                "started(2)",
                "next(2)=2",
                "complete(2)"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_drops_events_while_busy() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();
        let _sub = bus.listen_blocking(all, |ev| after(10, ev), recorder(&seen));

        bus.trigger(1).unwrap();
        bus.trigger(2).unwrap();
        sleep(Duration::from_millis(15)).await;
        bus.trigger(3).unwrap();
        sleep(Duration::from_millis(15)).await;

        assert_eq!(
            entries(&seen),
            [
                "started(1)",
                "next(1)=1",
                "complete(1)",
                "started(3)",
                "next(3)=3",
                "complete(3)"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggling_starts_then_cancels() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();
        let sub = bus.listen_toggling(all, |ev| after(10, ev), recorder(&seen));

        bus.trigger(1).unwrap();
        bus.trigger(2).unwrap();
        assert!(!sub.is_handling());
        bus.trigger(3).unwrap();
        assert!(sub.is_handling());

        sleep(Duration::from_millis(15)).await;
        assert_eq!(
            entries(&seen),
            [
                "started(1)",
                "canceled(1)",
                "started(3)",
                "next(3)=3",
                "complete(3)"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_only_latest_keeps_first_and_last() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();
        let _sub = bus.listen_queue_only_latest(all, |ev| after(10, ev), recorder(&seen));

        for ev in 1..=4 {
            bus.trigger(ev).unwrap();
        }
        sleep(Duration::from_millis(30)).await;

        let started: Vec<String> = entries(&seen)
            .into_iter()
            .filter(|e| e.starts_with("started"))
            .collect();
        assert_eq!(started, ["started(1)", "started(4)"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_toggle_needs_k_hits() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();
        let sub = bus.listen_threshold_toggle(2, all, |ev| after(100, ev), recorder(&seen));

        bus.trigger(1).unwrap();
        assert!(!sub.is_handling());
        bus.trigger(2).unwrap();
        assert!(sub.is_handling());
        bus.trigger(3).unwrap();
        assert!(sub.is_handling());
        bus.trigger(4).unwrap();
        assert!(!sub.is_handling());

        assert_eq!(entries(&seen), ["started(2)", "canceled(2)"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_runs_producer_cleanup() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();
        let cleaned = seen.clone();
        let sub = bus.listen(
            all,
            move |_| {
                let cleaned = cleaned.clone();
                Work::producer(move |emit| {
                    emit.next(1);
                    Some(Box::new(move || {
                        assert!(emit.is_closed());
                        push(&cleaned, "cleanup");
                    }) as crate::work::Cleanup)
                })
            },
            recorder(&seen),
            Concurrency::Immediate,
        );

        bus.trigger(7).unwrap();
        assert!(sub.is_handling());
        sub.cancel_current();

        assert_eq!(
            entries(&seen),
            ["started(7)", "next(7)=1", "cleanup", "canceled(7)"]
        );
        assert!(!sub.is_handling());
        assert!(!sub.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_current_and_queued_discards_pending() {
        let bus: Bus<u32> = Bus::new();
        let seen = log();
        let sub = bus.listen_queueing(all, |ev| after(10, ev), recorder(&seen));

        bus.trigger(1).unwrap();
        bus.trigger(2).unwrap();
        bus.trigger(3).unwrap();
        sub.cancel_current_and_queued();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(entries(&seen), ["started(1)", "canceled(1)"]);
        assert_eq!(sub.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_error_without_rescue_is_published_once() {
        let bus: Bus<u32> = Bus::new();
        let mut errors = bus.errors();
        let sub = bus.listen(
            all,
            |_| {
                Work::<u32>::try_future(async {
                    sleep(Duration::from_millis(5)).await;
                    Err(HandlerError::fail("late"))
                })
            },
            Observer::new(),
            Concurrency::Immediate,
        );

        bus.trigger(1).unwrap();
        assert!(!sub.is_closed());
        sleep(Duration::from_millis(10)).await;

        assert!(sub.is_closed());
        assert_eq!(
            errors.recv().await.unwrap(),
            HandlerError::fail("late")
        );
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_query_streams_matching_events() {
        let bus: Bus<u32> = Bus::new();
        let query = bus.query(|ev| ev % 2 == 0);
        for ev in 1..=6 {
            bus.trigger(ev).unwrap();
        }
        bus.reset();
        let got: Vec<u32> = query.collect().await;
        assert_eq!(got, [2, 4, 6]);
    }

    #[test]
    fn test_weak_bus_does_not_keep_bus_alive() {
        let bus: Bus<u32> = Bus::new();
        let weak = bus.downgrade();
        assert!(weak.upgrade().is_some());
        drop(bus);
        assert!(weak.upgrade().is_none());
    }
}
