//! # Service: a request/response effect running on a bus.
//!
//! A [`Service`] owns two registrations on its bus; the intake owns the worker lane:
//!
//! ```text
//!            bus: <ns>/request
//!                   │
//!  reducer listener ├─► fold every <ns>/* action into `state`   (registered first)
//!  intake           └─► stamp (epoch, cause) ─► worker lane (Concurrency policy)
//!                                                  │
//!        <ns>/started ◄── on_subscribe ────────────┤
//!        <ns>/next    ◄── on_next ─────────────────┤
//!        <ns>/error   ◄── on_error (rescued) ──────┤
//!        <ns>/complete◄── on_complete ─────────────┤
//!        <ns>/canceled◄── on_unsubscribe/discard ──┘
//! ```
//!
//! ## Rules
//! - Handler errors become `error` actions; the service keeps serving.
//! - `cancel_current_and_queued` bumps the cancel epoch. A request stamped with an
//!   older epoch never reaches the handler and ends as `canceled`.
//! - Every request ends with exactly one of `complete`, `error` or `canceled`.
//! - `stop` is idempotent and also runs when the last handle is dropped.
//! - A bus reset closes the intake with everything else, which stops the service.

use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::watch;

use crate::bus::{Bus, ErrorStream, WeakBus};
use crate::error::{BusError, HandlerError};
use crate::listener::{Accept, Activity, Control, Listener, Observer, Subscription};
use crate::policies::Concurrency;
use crate::work::Work;

use super::registry::Stop;
use super::{Action, Lifecycle, LifecycleKind, Reducer, ServiceBuilder, ServiceObserver, ServiceRegistry};

/// Request as seen by the worker lane.
#[derive(Clone)]
struct Stamped<Req> {
    req: Req,
    epoch: u64,
    cause: u64,
}

struct Shared<Req, Res, St> {
    namespace: Arc<str>,
    bus: WeakBus<Action<Req, Res>>,
    errors: ErrorStream,
    epoch: AtomicU64,
    stopped: AtomicBool,
    state: watch::Sender<St>,
    current_error: watch::Sender<Option<HandlerError>>,
    reducer: Arc<dyn Reducer<Req, Res, State = St>>,
}

impl<Req, Res, St> Shared<Req, Res, St>
where
    Req: Clone + Send + 'static,
    Res: Clone + Send + 'static,
    St: Clone + Send + Sync + 'static,
{
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn is_stale(&self, epoch: u64) -> bool {
        epoch < self.epoch()
    }

    fn emit(&self, cause: u64, event: Lifecycle<Req, Res>) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let action = Action::new(Arc::clone(&self.namespace), event).with_cause(cause);
        if let Err(err) = bus.trigger(action) {
            tracing::debug!(
                namespace = %self.namespace,
                error = err.as_label(),
                "lifecycle action rejected: {err}"
            );
        }
    }

    fn fold(&self, event: &Lifecycle<Req, Res>) {
        let current = self.state.borrow().clone();
        let reduced = catch_unwind(AssertUnwindSafe(|| self.reducer.reduce(&current, event)))
            .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));
        match reduced {
            Ok(next) => {
                self.state.send_replace(next);
            }
            Err(err) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    event = event.kind().as_label(),
                    error = err.as_label(),
                    "reducer failed, state unchanged: {err}"
                );
                self.errors.publish(err);
            }
        }
    }
}

/// Bus entry feeding `request` actions into the worker lane.
///
/// Closing it (stop, drop or a bus reset) closes the lane and marks the
/// service stopped.
struct Intake<Req, Res, St> {
    shared: Arc<Shared<Req, Res, St>>,
    worker: Arc<Listener<Stamped<Req>, Res>>,
}

impl<Req, Res, St> Control for Intake<Req, Res, St>
where
    Req: Clone + Send + 'static,
    Res: Clone + Send + 'static,
    St: Clone + Send + Sync + 'static,
{
    fn close(&self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!(namespace = %self.shared.namespace, "service stopped by its bus");
        }
        self.worker.close();
    }

    fn is_closed(&self) -> bool {
        self.worker.is_closed()
    }

    fn cancel_current(&self) {
        self.worker.cancel_current();
    }

    fn cancel_current_and_queued(&self) {
        self.worker.cancel_current_and_queued();
    }

    fn pending(&self) -> usize {
        Control::pending(&*self.worker)
    }

    fn activity(&self) -> &Activity {
        Control::activity(&*self.worker)
    }
}

impl<Req, Res, St> Accept<Action<Req, Res>> for Intake<Req, Res, St>
where
    Req: Clone + Send + 'static,
    Res: Clone + Send + 'static,
    St: Clone + Send + Sync + 'static,
{
    fn accept(&self, action: Action<Req, Res>) {
        let epoch = action.epoch.unwrap_or_else(|| self.shared.epoch());
        let cause = action.cause.unwrap_or(action.seq);
        if let Lifecycle::Request(req) = action.event {
            self.worker.accept(Stamped { req, epoch, cause });
        }
    }
}

struct Inner<Req, Res, St> {
    shared: Arc<Shared<Req, Res, St>>,
    bus: Bus<Action<Req, Res>>,
    intake: Subscription,
    reducer: Subscription,
}

impl<Req, Res, St> Inner<Req, Res, St> {
    fn shutdown(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.intake.cancel();
        self.reducer.cancel();
        tracing::debug!(namespace = %self.shared.namespace, "service stopped");
    }
}

impl<Req, Res, St> Stop for Inner<Req, Res, St>
where
    Req: Send + 'static,
    Res: Send + 'static,
    St: Send + Sync + 'static,
{
    fn stop(&self) {
        self.shutdown();
    }
}

impl<Req, Res, St> Drop for Inner<Req, Res, St> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a running service.
///
/// Cheap to clone; the service stops once every clone is dropped.
pub struct Service<Req, Res, St = ()> {
    inner: Arc<Inner<Req, Res, St>>,
}

impl<Req, Res, St> Clone for Service<Req, Res, St> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Req, Res, St> fmt::Debug for Service<Req, Res, St> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("namespace", &self.inner.shared.namespace)
            .field("stopped", &self.inner.shared.stopped.load(Ordering::Acquire))
            .field("worker", &self.inner.intake)
            .finish()
    }
}

impl<Req, Res, St> Service<Req, Res, St>
where
    Req: Clone + Send + 'static,
    Res: Clone + Send + 'static,
    St: Clone + Send + Sync + 'static,
{
    pub(super) fn start<H>(
        namespace: Arc<str>,
        bus: Bus<Action<Req, Res>>,
        concurrency: Concurrency,
        reducer: Arc<dyn Reducer<Req, Res, State = St>>,
        initial: Option<St>,
        registry: Option<ServiceRegistry>,
        handler: H,
    ) -> Self
    where
        H: Fn(Req) -> Work<Res> + Send + Sync + 'static,
    {
        let initial = initial.unwrap_or_else(|| reducer.initial());
        let (state, _) = watch::channel(initial);
        let (current_error, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            namespace: Arc::clone(&namespace),
            bus: bus.downgrade(),
            errors: bus.error_stream().clone(),
            epoch: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            state,
            current_error,
            reducer,
        });

        let reducer = {
            let shared = Arc::clone(&shared);
            let ns = Arc::clone(&namespace);
            bus.listen(
                move |action: &Action<Req, Res>| action.belongs_to(&ns),
                move |action: Action<Req, Res>| {
                    shared.fold(&action.event);
                    Work::<()>::none()
                },
                Observer::new(),
                Concurrency::Immediate,
            )
        };

        let worker = {
            let gate = Arc::clone(&shared);
            Listener::new(
                Arc::new(move |stamped: Stamped<Req>| {
                    if gate.is_stale(stamped.epoch) {
                        Work::none()
                    } else {
                        handler(stamped.req)
                    }
                }),
                lifecycle_observer(&shared),
                concurrency,
                bus.error_stream().clone(),
            )
        };

        let intake = Arc::new(Intake {
            shared: Arc::clone(&shared),
            worker,
        });
        {
            let ns = Arc::clone(&namespace);
            bus.attach(
                move |action: &Action<Req, Res>| action.is(&ns, LifecycleKind::Request),
                intake.clone(),
            );
        }

        let inner = Arc::new(Inner {
            shared,
            bus,
            intake: Subscription::new(intake),
            reducer,
        });
        if let Some(registry) = registry {
            let weak = Arc::downgrade(&inner);
            registry.register(namespace, weak);
        }
        Self { inner }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.shared.namespace
    }

    /// The bus this service publishes its lifecycle actions on.
    pub fn bus(&self) -> &Bus<Action<Req, Res>> {
        &self.inner.bus
    }

    fn request_action(&self, req: Req) -> Action<Req, Res> {
        let action = Action::new(Arc::clone(&self.inner.shared.namespace), Lifecycle::Request(req))
            .with_epoch(self.inner.shared.epoch());
        let seq = action.seq;
        action.with_cause(seq)
    }

    fn dispatch(&self, action: Action<Req, Res>) -> Result<(), BusError> {
        if self.is_stopped() {
            return Err(BusError::Stopped);
        }
        self.inner.bus.trigger(action)
    }

    /// Publishes a `request` action for `req`.
    ///
    /// # Errors
    /// [`BusError::Stopped`] after [`stop`](Self::stop); guard or filter failures of the bus.
    pub fn request(&self, req: Req) -> Result<(), BusError> {
        self.dispatch(self.request_action(req))
    }

    /// Publishes a request and resolves with its first response.
    ///
    /// The request is published when `send` is called; the returned future only
    /// waits for the outcome.
    ///
    /// # Errors
    /// - [`BusError::Handler`] if the handling failed before producing a value
    /// - [`BusError::Canceled`] if it was canceled or dropped by the policy
    /// - [`BusError::NoResponse`] if it completed without a value
    /// - [`BusError::Reset`] if the bus was reset first
    /// - the errors of [`request`](Self::request)
    pub fn send(&self, req: Req) -> impl Future<Output = Result<Res, BusError>> + Send + 'static {
        let action = self.request_action(req);
        let cause = action.seq;
        let ns = Arc::clone(&self.inner.shared.namespace);
        let mut outcome = self.inner.bus.query(move |a: &Action<Req, Res>| {
            a.cause == Some(cause)
                && a.belongs_to(&ns)
                && (a.kind() == LifecycleKind::Next || a.kind().is_terminal())
        });
        let sent = self.dispatch(action);

        async move {
            sent?;
            let Some(action) = outcome.recv().await else {
                return Err(BusError::Reset);
            };
            match action.event {
                Lifecycle::Next(res) => Ok(res),
                Lifecycle::Error(source) => Err(BusError::Handler { source }),
                Lifecycle::Canceled(_) => Err(BusError::Canceled),
                _ => Err(BusError::NoResponse),
            }
        }
    }

    /// Cancels the active handling; queued requests may start afterwards.
    pub fn cancel_current(&self) {
        self.inner.intake.cancel_current();
    }

    /// Cancels the active handling and every request issued before this call.
    pub fn cancel_current_and_queued(&self) {
        self.inner.shared.epoch.fetch_add(1, Ordering::AcqRel);
        self.inner.intake.cancel_current_and_queued();
    }

    /// Stops accepting requests and cancels everything in flight. Idempotent.
    pub fn stop(&self) {
        self.inner.shutdown();
    }

    /// Alias of [`stop`](Self::stop).
    pub fn shutdown(&self) {
        self.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shared.stopped.load(Ordering::Acquire)
    }

    /// Current folded state.
    pub fn state(&self) -> St {
        self.inner.shared.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<St> {
        self.inner.shared.state.subscribe()
    }

    pub fn is_handling(&self) -> bool {
        self.inner.intake.is_handling()
    }

    /// Flicker-free variant of [`is_handling`](Self::is_handling).
    pub fn is_active(&self) -> bool {
        self.inner.intake.is_active()
    }

    pub fn watch_active(&self) -> watch::Receiver<bool> {
        self.inner.intake.watch_active()
    }

    /// Most recent handler error; cleared when the next handling starts.
    pub fn current_error(&self) -> Option<HandlerError> {
        self.inner.shared.current_error.borrow().clone()
    }

    pub fn watch_current_error(&self) -> watch::Receiver<Option<HandlerError>> {
        self.inner.shared.current_error.subscribe()
    }

    fn project<U>(&self, kind: LifecycleKind, pick: fn(Lifecycle<Req, Res>) -> Option<U>) -> BoxStream<'static, U>
    where
        U: Send + 'static,
    {
        let ns = Arc::clone(&self.inner.shared.namespace);
        self.inner
            .bus
            .query(move |a: &Action<Req, Res>| a.is(&ns, kind))
            .filter_map(move |a| future::ready(pick(a.event)))
            .boxed()
    }

    /// Every value produced by a handling.
    pub fn responses(&self) -> BoxStream<'static, Res> {
        self.project(LifecycleKind::Next, Lifecycle::into_response)
    }

    /// Every handler error.
    pub fn errors(&self) -> BoxStream<'static, HandlerError> {
        self.project(LifecycleKind::Error, Lifecycle::into_error)
    }

    /// Requests whose handling started.
    pub fn starts(&self) -> BoxStream<'static, Req> {
        self.project(LifecycleKind::Started, Lifecycle::into_request)
    }

    /// Requests whose handling completed.
    pub fn completions(&self) -> BoxStream<'static, Req> {
        self.project(LifecycleKind::Complete, Lifecycle::into_request)
    }

    /// Requests that were canceled or dropped.
    pub fn cancelations(&self) -> BoxStream<'static, Req> {
        self.project(LifecycleKind::Canceled, Lifecycle::into_request)
    }

    /// Wires `observer` to this service's lifecycle actions.
    ///
    /// Cancel the returned subscription to detach every callback at once.
    pub fn observe(&self, observer: ServiceObserver<Req, Res>) -> Subscription {
        let ns = Arc::clone(&self.inner.shared.namespace);
        self.inner.bus.listen(
            move |a: &Action<Req, Res>| a.belongs_to(&ns),
            move |a: Action<Req, Res>| {
                observer.dispatch(&a.event);
                Work::<()>::none()
            },
            Observer::new(),
            Concurrency::Immediate,
        )
    }
}

impl<Req, Res> Service<Req, Res, ()>
where
    Req: Clone + Send + 'static,
    Res: Clone + Send + 'static,
{
    /// Starts configuring a service publishing under `namespace`.
    pub fn builder(namespace: impl Into<Arc<str>>) -> ServiceBuilder<Req, Res, ()> {
        ServiceBuilder::new(namespace)
    }

    /// Stateless service on a private bus.
    ///
    /// Its lifecycle is only observable through the service itself.
    pub fn effect<H>(concurrency: Concurrency, handler: H) -> Self
    where
        H: Fn(Req) -> Work<Res> + Send + Sync + 'static,
    {
        ServiceBuilder::new("effect")
            .with_concurrency(concurrency)
            .build(handler)
    }
}

fn lifecycle_observer<Req, Res, St>(shared: &Arc<Shared<Req, Res, St>>) -> Observer<Stamped<Req>, Res>
where
    Req: Clone + Send + 'static,
    Res: Clone + Send + 'static,
    St: Clone + Send + Sync + 'static,
{
    let started = Arc::clone(shared);
    let next = Arc::clone(shared);
    let failed = Arc::clone(shared);
    let completed = Arc::clone(shared);
    let canceled = Arc::clone(shared);
    let dropped = Arc::clone(shared);

    Observer::new()
        .on_subscribe(move |s: &Stamped<Req>| {
            if started.is_stale(s.epoch) {
                return;
            }
            started.current_error.send_if_modified(|err| err.take().is_some());
            started.emit(s.cause, Lifecycle::Started(s.req.clone()));
        })
        .on_next(move |s: &Stamped<Req>, res: Res| next.emit(s.cause, Lifecycle::Next(res)))
        .on_error(move |s: &Stamped<Req>, err: HandlerError| {
            failed.current_error.send_replace(Some(err.clone()));
            failed.emit(s.cause, Lifecycle::Error(err));
        })
        .on_complete(move |s: &Stamped<Req>| {
            let event = if completed.is_stale(s.epoch) {
                Lifecycle::Canceled(s.req.clone())
            } else {
                Lifecycle::Complete(s.req.clone())
            };
            completed.emit(s.cause, event);
        })
        .on_unsubscribe(move |s: &Stamped<Req>| canceled.emit(s.cause, Lifecycle::Canceled(s.req.clone())))
        .on_discard(move |s: &Stamped<Req>| dropped.emit(s.cause, Lifecycle::Canceled(s.req.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::time::sleep;

    use crate::service::ReducerFn;

    fn after(ms: u64, v: u32) -> Work<u32> {
        Work::future(async move {
            sleep(Duration::from_millis(ms)).await;
            v
        })
    }

    fn kinds(bus: &Bus<Action<u32, u32>>) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _ = bus.spy(move |a| sink.lock().unwrap().push(a.type_name()));
        seen
    }

    #[tokio::test]
    async fn test_send_resolves_with_first_response() {
        let svc = Service::effect(Concurrency::Queueing, |n: u32| Work::iter([n * 2, n * 3]));
        assert_eq!(svc.send(21).await, Ok(42));
    }

    #[tokio::test]
    async fn test_send_maps_terminal_outcomes() {
        let svc = Service::effect(Concurrency::Immediate, |n: u32| match n {
            0 => Work::fail(HandlerError::fail("zero")),
            1 => Work::none(),
            _ => Work::value(n),
        });

        assert_eq!(
            svc.send(0).await,
            Err(BusError::Handler {
                source: HandlerError::fail("zero")
            })
        );
        assert_eq!(svc.send(1).await, Err(BusError::NoResponse));
        assert_eq!(svc.send(7).await, Ok(7));
    }

    #[tokio::test]
    async fn test_lifecycle_actions_follow_request_order() {
        let bus: Bus<Action<u32, u32>> = Bus::new();
        let seen = kinds(&bus);
        let svc = Service::builder("calc").with_bus(&bus).build(|n: u32| Work::value(n + 1));

        svc.request(1).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["calc/request", "calc/started", "calc/next", "calc/complete"]
        );
    }

    #[tokio::test]
    async fn test_lifecycle_actions_share_request_cause() {
        let bus: Bus<Action<u32, u32>> = Bus::new();
        let mut actions = bus.query(|_: &Action<u32, u32>| true);
        let svc = Service::builder("calc").with_bus(&bus).build(|n: u32| Work::value(n));

        svc.request(5).unwrap();

        let request = actions.try_next().unwrap();
        assert_eq!(request.cause, Some(request.seq));
        while let Some(action) = actions.try_next() {
            assert_eq!(action.cause, Some(request.seq));
            assert!(action.seq > request.seq);
        }
    }

    #[tokio::test]
    async fn test_handler_error_sets_current_error_until_next_start() {
        let svc = Service::effect(Concurrency::Queueing, |n: u32| {
            if n == 0 {
                Work::fail(HandlerError::fail("zero"))
            } else {
                Work::value(n)
            }
        });
        let mut errors = svc.bus().errors();

        assert!(svc.send(0).await.is_err());
        assert_eq!(svc.current_error(), Some(HandlerError::fail("zero")));

        assert_eq!(svc.send(3).await, Ok(3));
        assert_eq!(svc.current_error(), None);
        assert!(!svc.is_stopped());
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reducer_folds_lifecycle_into_state() {
        let svc = Service::builder("sum")
            .with_reducer(ReducerFn::new(0u32, |sum: &u32, ev: &Lifecycle<u32, u32>| {
                Ok(match ev {
                    Lifecycle::Next(v) => sum + v,
                    _ => *sum,
                })
            }))
            .build(|n: u32| Work::value(n * 10));

        assert_eq!(svc.state(), 0);
        svc.send(1).await.unwrap();
        svc.send(2).await.unwrap();
        assert_eq!(svc.state(), 30);
    }

    #[tokio::test]
    async fn test_initial_state_overrides_reducer_default() {
        let svc = Service::builder("count")
            .with_reducer(ReducerFn::new(0u32, |n: &u32, ev: &Lifecycle<u32, u32>| {
                Ok(if ev.kind() == LifecycleKind::Complete { n + 1 } else { *n })
            }))
            .with_initial_state(100)
            .build(|n: u32| Work::value(n));

        svc.send(1).await.unwrap();
        assert_eq!(svc.state(), 101);
    }

    #[tokio::test]
    async fn test_failing_reducer_keeps_state_and_reports() {
        let svc = Service::builder("strict")
            .with_reducer(ReducerFn::new(1u32, |n: &u32, ev: &Lifecycle<u32, u32>| match ev {
                Lifecycle::Next(0) => Err(HandlerError::fail("zero")),
                Lifecycle::Next(v) => Ok(n * v),
                _ => Ok(*n),
            }))
            .build(|n: u32| Work::value(n));
        let mut errors = svc.bus().errors();

        assert_eq!(svc.send(0).await, Ok(0));
        assert_eq!(svc.state(), 1);
        assert_eq!(errors.try_recv().unwrap(), HandlerError::fail("zero"));

        assert_eq!(svc.send(5).await, Ok(5));
        assert_eq!(svc.state(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_service_cancels_dropped_requests() {
        let svc = Service::effect(Concurrency::Blocking, |n: u32| after(10, n));

        let first = svc.send(1);
        let second = svc.send(2);

        assert_eq!(second.await, Err(BusError::Canceled));
        assert_eq!(first.await, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_current_and_queued_cancels_everything_issued_before() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let svc = Service::effect(Concurrency::Queueing, move |n: u32| {
            seen.lock().unwrap().push(n);
            after(10, n)
        });

        let a = svc.send(1);
        let b = svc.send(2);
        svc.cancel_current_and_queued();
        let c = svc.send(3);

        assert_eq!(a.await, Err(BusError::Canceled));
        assert_eq!(b.await, Err(BusError::Canceled));
        assert_eq!(c.await, Ok(3));
        assert_eq!(*calls.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_request_queued_on_bus_before_cancel_never_runs() {
        let bus: Bus<Action<u32, u32>> = Bus::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let svc = Service::builder("lane")
            .with_bus(&bus)
            .with_concurrency(Concurrency::Queueing)
            .build(move |n: u32| {
                seen.lock().unwrap().push(n);
                Work::value(n)
            });
        let mut canceled = svc.cancelations();

        // Issued while the bus is still dispatching `1`, so it is queued with the old epoch.
        let inner = svc.clone();
        let _hook = bus.listen(
            |a: &Action<u32, u32>| a.is("lane", LifecycleKind::Started) && a.event.request() == Some(&1),
            move |_| {
                inner.request(2).unwrap();
                inner.cancel_current_and_queued();
                Work::<()>::none()
            },
            Observer::new(),
            Concurrency::Immediate,
        );

        svc.request(1).unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![1]);
        assert_eq!(canceled.next().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queueing_service_stays_active_between_handlings() {
        let svc = Service::effect(Concurrency::Queueing, |n: u32| after(10, n));
        let mut active = svc.watch_active();
        let flips = Arc::new(Mutex::new(Vec::new()));
        let sink = flips.clone();
        let watcher = tokio::spawn(async move {
            while active.changed().await.is_ok() {
                let now = *active.borrow_and_update();
                sink.lock().unwrap().push(now);
                if !now {
                    break;
                }
            }
        });

        let a = svc.send(1);
        let b = svc.send(2);
        assert!(svc.is_handling());
        assert_eq!(a.await, Ok(1));
        assert!(svc.is_active());
        assert_eq!(b.await, Ok(2));

        watcher.await.unwrap();
        assert_eq!(*flips.lock().unwrap(), vec![true, false]);
        assert!(!svc.is_handling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_in_flight_and_rejects_requests() {
        let svc = Service::effect(Concurrency::Immediate, |n: u32| after(10, n));

        let pending = svc.send(1);
        svc.stop();
        svc.stop();

        assert!(svc.is_stopped());
        assert_eq!(pending.await, Err(BusError::Canceled));
        assert_eq!(svc.request(2), Err(BusError::Stopped));
        assert_eq!(svc.send(3).await, Err(BusError::Stopped));
    }

    #[tokio::test]
    async fn test_dropping_last_handle_detaches_from_bus() {
        let bus: Bus<Action<u32, u32>> = Bus::new();
        let svc = Service::builder("gone").with_bus(&bus).build(|n: u32| Work::value(n));
        let copy = svc.clone();
        assert_eq!(bus.listener_count(), 2);

        drop(svc);
        assert_eq!(bus.listener_count(), 2);
        drop(copy);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_stops_every_live_service() {
        let registry = ServiceRegistry::new();
        let bus: Bus<Action<u32, u32>> = Bus::new();
        let a = Service::builder("a").with_bus(&bus).with_registry(&registry).build(|n: u32| Work::value(n));
        let b = Service::builder("b").with_bus(&bus).with_registry(&registry).build(|n: u32| Work::value(n));
        let c = Service::builder("c").with_registry(&registry).build(|n: u32| Work::value(n));
        drop(c);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.shutdown_all(), 2);
        assert!(a.is_stopped() && b.is_stopped());
        assert!(registry.is_empty());
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_observe_routes_events_until_canceled() {
        let svc = Service::effect(Concurrency::Immediate, |n: u32| {
            if n == 0 {
                Work::fail(HandlerError::fail("zero"))
            } else {
                Work::value(n)
            }
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c, d) = (seen.clone(), seen.clone(), seen.clone(), seen.clone());
        let sub = svc.observe(
            ServiceObserver::new()
                .on_started(move |req| a.lock().unwrap().push(format!("started({req})")))
                .on_next(move |res| b.lock().unwrap().push(format!("next={res}")))
                .on_error(move |err| c.lock().unwrap().push(format!("error={}", err.as_label())))
                .on_complete(move |req| d.lock().unwrap().push(format!("complete({req})"))),
        );

        svc.send(4).await.unwrap();
        assert!(svc.send(0).await.is_err());
        sub.cancel();
        svc.send(5).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["started(4)", "next=4", "complete(4)", "started(0)", "error=handler_failed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_projections_stream_lifecycle_payloads() {
        let svc = Service::effect(Concurrency::Queueing, |n: u32| after(5, n + 100));
        let responses = svc.responses();
        let starts = svc.starts();
        let completions = svc.completions();

        svc.request(1).unwrap();
        svc.request(2).unwrap();

        assert_eq!(responses.take(2).collect::<Vec<_>>().await, vec![101, 102]);
        assert_eq!(starts.take(2).collect::<Vec<_>>().await, vec![1, 2]);
        assert_eq!(completions.take(2).collect::<Vec<_>>().await, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_reset_stops_service_and_cancels_in_flight_work() {
        let bus: Bus<Action<u32, u32>> = Bus::new();
        let svc = Service::builder("svc").with_bus(&bus).build(|n: u32| after(10, n));

        let pending = svc.send(1);
        assert!(svc.is_handling());

        bus.reset();
        let seen = kinds(&bus);

        assert_eq!(pending.await, Err(BusError::Reset));
        sleep(Duration::from_millis(20)).await;

        assert!(seen.lock().unwrap().is_empty());
        assert!(!svc.is_handling());
        assert!(svc.is_stopped());
        assert_eq!(svc.request(2), Err(BusError::Stopped));
        assert_eq!(svc.send(3).await, Err(BusError::Stopped));
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_reports_requests_and_cancelations() {
        let svc = Service::effect(Concurrency::Blocking, |n: u32| after(10, n));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (seen.clone(), seen.clone());
        let _sub = svc.observe(
            ServiceObserver::new()
                .on_request(move |req| a.lock().unwrap().push(format!("request({req})")))
                .on_canceled(move |req| b.lock().unwrap().push(format!("canceled({req})"))),
        );

        let first = svc.send(1);
        let second = svc.send(2);

        assert_eq!(second.await, Err(BusError::Canceled));
        assert_eq!(first.await, Ok(1));
        assert_eq!(*seen.lock().unwrap(), vec!["request(1)", "request(2)", "canceled(2)"]);
    }
}
