use std::fmt;
use std::sync::Arc;

use crate::error::HandlerError;

use super::Lifecycle;

type Callback<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// Partial set of callbacks for [`Service::observe`](crate::Service::observe).
///
/// Any subset may be supplied; the rest is ignored.
pub struct ServiceObserver<Req, Res> {
    request: Option<Callback<Req>>,
    started: Option<Callback<Req>>,
    next: Option<Callback<Res>>,
    error: Option<Callback<HandlerError>>,
    complete: Option<Callback<Req>>,
    canceled: Option<Callback<Req>>,
}

impl<Req, Res> Default for ServiceObserver<Req, Res> {
    fn default() -> Self {
        Self {
            request: None,
            started: None,
            next: None,
            error: None,
            complete: None,
            canceled: None,
        }
    }
}

impl<Req, Res> ServiceObserver<Req, Res> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request(mut self, f: impl Fn(&Req) + Send + Sync + 'static) -> Self {
        self.request = Some(Arc::new(f));
        self
    }

    pub fn on_started(mut self, f: impl Fn(&Req) + Send + Sync + 'static) -> Self {
        self.started = Some(Arc::new(f));
        self
    }

    pub fn on_next(mut self, f: impl Fn(&Res) + Send + Sync + 'static) -> Self {
        self.next = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&HandlerError) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&Req) + Send + Sync + 'static) -> Self {
        self.complete = Some(Arc::new(f));
        self
    }

    pub fn on_canceled(mut self, f: impl Fn(&Req) + Send + Sync + 'static) -> Self {
        self.canceled = Some(Arc::new(f));
        self
    }

    /// Routes one lifecycle event to the matching callback.
    pub(crate) fn dispatch(&self, event: &Lifecycle<Req, Res>) {
        match event {
            Lifecycle::Request(req) => call(&self.request, req),
            Lifecycle::Started(req) => call(&self.started, req),
            Lifecycle::Next(res) => call(&self.next, res),
            Lifecycle::Error(err) => call(&self.error, err),
            Lifecycle::Complete(req) => call(&self.complete, req),
            Lifecycle::Canceled(req) => call(&self.canceled, req),
        }
    }
}

fn call<V>(callback: &Option<Callback<V>>, value: &V) {
    if let Some(f) = callback {
        f(value);
    }
}

impl<Req, Res> fmt::Debug for ServiceObserver<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceObserver")
            .field("request", &self.request.is_some())
            .field("started", &self.started.is_some())
            .field("next", &self.next.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .field("canceled", &self.canceled.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[test]
    fn test_dispatch_routes_each_kind_to_its_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (seen.clone(), seen.clone(), seen.clone());
        let observer = ServiceObserver::<u32, String>::new()
            .on_request(move |req| a.lock().unwrap().push(format!("request({req})")))
            .on_next(move |res| b.lock().unwrap().push(format!("next({res})")))
            .on_canceled(move |req| c.lock().unwrap().push(format!("canceled({req})")));

        observer.dispatch(&Lifecycle::Request(1));
        observer.dispatch(&Lifecycle::Started(1));
        observer.dispatch(&Lifecycle::Next("one".to_string()));
        observer.dispatch(&Lifecycle::Error(HandlerError::fail("ignored")));
        observer.dispatch(&Lifecycle::Canceled(1));

        assert_eq!(*seen.lock().unwrap(), vec!["request(1)", "next(one)", "canceled(1)"]);
    }
}
