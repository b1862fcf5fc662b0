//! Listeners: execution of handlers under a concurrency policy.
//!
//! This module owns everything that happens after the bus decided an event
//! matches a listener.
//!
//! ## Contents
//! - [`Observer`]     optional lifecycle callbacks receiving the source event
//! - [`Activity`]     started-minus-terminated counter with `handling`/`active` signals
//! - [`Subscription`] handle returned to the caller of `listen`
//! - `Listener`       (internal) one lane of handlings driven by a [`Scheduler`](crate::policies::Scheduler)
//!
//! ## Flow
//! ```text
//! Bus::trigger ──► Listener::accept(event)
//!                    ├─► Scheduler decides start / cancel / queue / drop
//!                    ├─► handler(event) → Work<T> → stream
//!                    └─► Observer: subscribe → next* → complete | error | unsubscribe → finalize
//! ```

mod activity;
mod handling;
mod lane;
mod observer;
mod subscription;

pub use activity::Activity;
pub use observer::Observer;
pub use subscription::Subscription;

pub(crate) use lane::Listener;
pub(crate) use subscription::{Accept, Control};
