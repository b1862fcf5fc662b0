//! # effectbus
//!
//! **effectbus** is an in-process event bus for Rust with concurrency-controlled
//! listeners and request/response services built on top of it.
//!
//! Every event goes through one ordered queue. Events triggered while the bus is
//! dispatching (for example from inside a listener) are appended to that queue,
//! so every listener observes events in trigger order.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   trigger(event)                        trigger(event)
//!        │                                     │
//!        ▼                                     ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Bus                                                              │
//! │  - guards   (reject: Err back to the caller)                      │
//! │  - filters  (drop or replace the event)                           │
//! │  - spies    (observe what passed)                                 │
//! │  - queue    (FIFO, drained by whichever trigger call got there    │
//! │              first; nested triggers only enqueue)                 │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               ▼
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐     Query / next_event
//!   │ Listener │       │ Listener │       │ Listener │     (streams of matches)
//!   │ Queueing │       │Switching │       │ Immediate│
//!   └────┬─────┘       └────┬─────┘       └────┬─────┘
//!        ▼                  ▼                  ▼
//!   handler(event) ─► Work<T> ─► Observer callbacks (subscribe/next/error/complete/...)
//!                                     │
//!                          Activity: is_handling / is_active
//! ```
//!
//! ### Services
//! ```text
//! Service::send(req) ──► bus: <ns>/request
//!                           ├─► reducer listener: state = reduce(state, event)
//!                           └─► worker lane (Concurrency) ──► handler(req)
//!                                    ├─► <ns>/started
//!                                    ├─► <ns>/next     ──► send() resolves Ok(res)
//!                                    ├─► <ns>/error    ──► send() resolves Err(Handler)
//!                                    ├─► <ns>/complete
//!                                    └─► <ns>/canceled ──► send() resolves Err(Canceled)
//! ```
//!
//! ## Features
//! | Area              | Description                                                         | Key types / traits                       |
//! |-------------------|---------------------------------------------------------------------|------------------------------------------|
//! | **Bus**           | Ordered dispatch with guards, filters, spies and queries.           | [`Bus`], [`Registration`], [`Query`]     |
//! | **Listeners**     | Handler per event under a concurrency policy.                       | [`Concurrency`], [`Observer`], [`Work`]  |
//! | **Activity**      | Flicker-free "busy" signal per listener or service.                 | [`Activity`], [`Subscription`]           |
//! | **Services**      | Request/response effects with lifecycle actions and folded state.   | [`Service`], [`Reducer`], [`Action`]     |
//! | **Shutdown**      | Stop many services at once.                                         | [`ServiceRegistry`]                      |
//!
//! ## Optional features
//! - `logging`: exports [`LogWriter`], a tracing writer for lifecycle actions.
//!
//! ## Example
//! ```rust
//! use effectbus::{Bus, Concurrency, Observer, Work};
//!
//! let bus: Bus<u32> = Bus::new();
//! let sub = bus.listen(
//!     |n: &u32| n % 2 == 0,
//!     |n: u32| Work::value(n * 10),
//!     Observer::new().on_next(|n: &u32, v: u32| println!("{n} -> {v}")),
//!     Concurrency::Immediate,
//! );
//!
//! bus.trigger(1).unwrap();
//! bus.trigger(2).unwrap();
//! assert!(!sub.is_handling());
//! ```

mod bus;
mod config;
mod error;
mod listener;
mod policies;
mod service;
mod work;

// ---- Public re-exports ----

pub use bus::{Bus, Matcher, Query, Registration, WeakBus};
pub use config::Config;
pub use error::{BusError, HandlerError};
pub use listener::{Activity, Observer, Subscription};
pub use policies::{Concurrency, HandlingId, Scheduler, Step};
pub use service::{
    Action, Lifecycle, LifecycleKind, Reducer, ReducerFn, Service, ServiceBuilder,
    ServiceObserver, ServiceRegistry, Stateless,
};
pub use work::{Cleanup, Emitter, Work, WorkStream};

// Optional: expose a tracing writer for service lifecycle actions.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use service::LogWriter;
