//! Pre-dispatch hooks and their removal handle.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::HandlerError;

/// Predicate selecting the events a registration is interested in.
pub type Matcher<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

pub(super) type GuardFn<E> = Arc<dyn Fn(&E) -> Result<(), HandlerError> + Send + Sync>;
pub(super) type FilterFn<E> = Arc<dyn Fn(E) -> Result<Option<E>, HandlerError> + Send + Sync>;
pub(super) type SpyFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub(super) struct Guard<E> {
    pub(super) id: u64,
    pub(super) matcher: Matcher<E>,
    pub(super) check: GuardFn<E>,
}

pub(super) struct Filter<E> {
    pub(super) id: u64,
    pub(super) matcher: Matcher<E>,
    pub(super) apply: FilterFn<E>,
}

pub(super) struct Spy<E> {
    pub(super) id: u64,
    pub(super) observe: SpyFn<E>,
}

// Manual impls: a derive would require `E: Clone`.
impl<E> Clone for Guard<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            matcher: Arc::clone(&self.matcher),
            check: Arc::clone(&self.check),
        }
    }
}

impl<E> Clone for Filter<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            matcher: Arc::clone(&self.matcher),
            apply: Arc::clone(&self.apply),
        }
    }
}

impl<E> Clone for Spy<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            observe: Arc::clone(&self.observe),
        }
    }
}

/// Ordered hook lists of one bus.
pub(super) struct Hooks<E> {
    pub(super) guards: Vec<Guard<E>>,
    pub(super) filters: Vec<Filter<E>>,
    pub(super) spies: Vec<Spy<E>>,
}

impl<E> Default for Hooks<E> {
    fn default() -> Self {
        Self {
            guards: Vec::new(),
            filters: Vec::new(),
            spies: Vec::new(),
        }
    }
}

impl<E> Clone for Hooks<E> {
    fn clone(&self) -> Self {
        Self {
            guards: self.guards.clone(),
            filters: self.filters.clone(),
            spies: self.spies.clone(),
        }
    }
}

impl<E> Hooks<E> {
    /// Removes the hook with the given id from whichever list holds it.
    pub(super) fn remove(&mut self, id: u64) {
        self.guards.retain(|g| g.id != id);
        self.filters.retain(|f| f.id != id);
        self.spies.retain(|s| s.id != id);
    }

    pub(super) fn clear(&mut self) {
        self.guards.clear();
        self.filters.clear();
        self.spies.clear();
    }
}

/// Handle removing exactly one guard, filter or spy.
///
/// Dropping the handle keeps the hook registered.
#[derive(Clone)]
pub struct Registration {
    canceled: Arc<AtomicBool>,
    detach: Arc<dyn Fn() + Send + Sync>,
}

impl Registration {
    pub(super) fn new(detach: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
            detach: Arc::new(detach),
        }
    }

    /// Removes the hook. Idempotent.
    pub fn cancel(&self) {
        if !self.canceled.swap(true, Ordering::AcqRel) {
            (self.detach)();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
