//! The event bus.
//!
//! ## Contents
//! - [`Bus`]          ordered dispatch of events to hooks, queries and listeners
//! - [`WeakBus`]      non-owning handle, used by services that publish back onto their bus
//! - [`Registration`] removal handle of a guard, filter or spy
//! - [`Query`]        stream of future matching events
//! - [`Matcher`]      predicate type shared by every registration
//!
//! ## Stages
//! ```text
//! guard ─► filter ─► spy ─► listeners
//!   │        │
//!   └────────┴─► Err(BusError) back to the trigger caller
//! ```
//! Listener failures never reach the trigger caller; they go to the listener's
//! `on_error` callback or to [`Bus::errors`].

mod channel;
mod errors;
mod hooks;
mod query;

pub use channel::{Bus, WeakBus};
pub use hooks::{Matcher, Registration};
pub use query::Query;

pub(crate) use errors::ErrorStream;
