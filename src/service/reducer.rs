//! # State reducers.
//!
//! A [`Reducer`] folds every lifecycle event of a service into a single state
//! value, in the order the events appear on the bus. A failing or panicking
//! reducer leaves the state unchanged and reports the error on the bus error stream.

use std::fmt;

use crate::error::HandlerError;

use super::Lifecycle;

/// Folds lifecycle events into a state value.
pub trait Reducer<Req, Res>: Send + Sync + 'static {
    /// Type of the folded state.
    type State: Clone + Send + Sync + 'static;

    /// State before any event was seen.
    fn initial(&self) -> Self::State;

    /// Computes the state after `event`.
    fn reduce(
        &self,
        state: &Self::State,
        event: &Lifecycle<Req, Res>,
    ) -> Result<Self::State, HandlerError>;
}

/// Reducer keeping no state at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stateless;

impl<Req, Res> Reducer<Req, Res> for Stateless {
    type State = ();

    fn initial(&self) {}

    fn reduce(&self, _: &(), _: &Lifecycle<Req, Res>) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Reducer built from an initial value and a closure.
///
/// # Example
/// ```
/// use effectbus::{HandlerError, Lifecycle, Reducer, ReducerFn};
///
/// let count = ReducerFn::new(0u32, |n: &u32, ev: &Lifecycle<(), u32>| {
///     Ok::<_, HandlerError>(match ev {
///         Lifecycle::Next(v) => n + v,
///         _ => *n,
///     })
/// });
/// let next = Reducer::<(), u32>::reduce(&count, &1, &Lifecycle::Next(2));
/// assert_eq!(next, Ok(3));
/// ```
pub struct ReducerFn<St, F> {
    initial: St,
    f: F,
}

impl<St, F> ReducerFn<St, F> {
    pub fn new<Req, Res>(initial: St, f: F) -> Self
    where
        F: Fn(&St, &Lifecycle<Req, Res>) -> Result<St, HandlerError>,
    {
        Self { initial, f }
    }
}

impl<Req, Res, St, F> Reducer<Req, Res> for ReducerFn<St, F>
where
    St: Clone + Send + Sync + 'static,
    F: Fn(&St, &Lifecycle<Req, Res>) -> Result<St, HandlerError> + Send + Sync + 'static,
    Req: 'static,
    Res: 'static,
{
    type State = St;

    fn initial(&self) -> St {
        self.initial.clone()
    }

    fn reduce(&self, state: &St, event: &Lifecycle<Req, Res>) -> Result<St, HandlerError> {
        (self.f)(state, event)
    }
}

impl<St: fmt::Debug, F> fmt::Debug for ReducerFn<St, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducerFn")
            .field("initial", &self.initial)
            .finish_non_exhaustive()
    }
}
