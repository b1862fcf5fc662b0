use std::sync::Arc;

use crate::bus::Bus;
use crate::config::Config;
use crate::policies::Concurrency;
use crate::work::Work;

use super::reducer::Stateless;
use super::{Action, Reducer, Service, ServiceRegistry};

/// Builder for constructing a [`Service`].
///
/// Without [`with_bus`](Self::with_bus) the service gets a private bus named
/// after its namespace.
pub struct ServiceBuilder<Req, Res, St = ()> {
    namespace: Arc<str>,
    bus: Option<Bus<Action<Req, Res>>>,
    concurrency: Concurrency,
    reducer: Arc<dyn Reducer<Req, Res, State = St>>,
    initial: Option<St>,
    registry: Option<ServiceRegistry>,
}

impl<Req, Res> ServiceBuilder<Req, Res, ()>
where
    Req: Clone + Send + 'static,
    Res: Clone + Send + 'static,
{
    /// Creates a builder for a stateless service.
    pub fn new(namespace: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
            bus: None,
            concurrency: Concurrency::default(),
            reducer: Arc::new(Stateless),
            initial: None,
            registry: None,
        }
    }
}

impl<Req, Res, St> ServiceBuilder<Req, Res, St>
where
    Req: Clone + Send + 'static,
    Res: Clone + Send + 'static,
    St: Clone + Send + Sync + 'static,
{
    /// Publishes lifecycle actions on a shared bus.
    pub fn with_bus(mut self, bus: &Bus<Action<Req, Res>>) -> Self {
        self.bus = Some(bus.clone());
        self
    }

    /// Sets the policy applied to overlapping requests (default `Immediate`).
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Folds lifecycle events into a state with `reducer`.
    ///
    /// Replaces any previously set reducer and drops a previously set initial state.
    pub fn with_reducer<R>(self, reducer: R) -> ServiceBuilder<Req, Res, R::State>
    where
        R: Reducer<Req, Res>,
    {
        ServiceBuilder {
            namespace: self.namespace,
            bus: self.bus,
            concurrency: self.concurrency,
            reducer: Arc::new(reducer),
            initial: None,
            registry: self.registry,
        }
    }

    /// Overrides the reducer's initial state.
    pub fn with_initial_state(mut self, state: St) -> Self {
        self.initial = Some(state);
        self
    }

    /// Enrolls the service in `registry`.
    pub fn with_registry(mut self, registry: &ServiceRegistry) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    /// Builds the service and registers it on its bus.
    pub fn build<H>(self, handler: H) -> Service<Req, Res, St>
    where
        H: Fn(Req) -> Work<Res> + Send + Sync + 'static,
    {
        let bus = self
            .bus
            .unwrap_or_else(|| Bus::with_config(Config::named(self.namespace.to_string())));
        Service::start(
            self.namespace,
            bus,
            self.concurrency,
            self.reducer,
            self.initial,
            self.registry,
            handler,
        )
    }
}
