//! Concurrency policies.
//!
//! This module groups the knobs that control **how** overlapping handlings of one
//! listener are started, queued, replaced, blocked or toggled.
//!
//! ## Contents
//! - [`Concurrency`] what to do with an event that arrives while a handling is active
//! - [`Scheduler`]   the lane state machine that turns a policy into start/cancel steps
//!
//! ## Quick wiring
//! ```text
//! Bus::listen(matcher, handler, observer, Concurrency)
//!      └─► listener::Listener uses:
//!           - scheduler.trigger(event) to decide start/cancel/queue/drop
//!           - scheduler.finished(id) to start whatever was waiting
//! ```
//!
//! ## Defaults
//! - `Concurrency::Immediate` (every event starts its own handling).

mod concurrency;
mod scheduler;

pub use concurrency::Concurrency;
pub use scheduler::{HandlingId, Scheduler, Step};
