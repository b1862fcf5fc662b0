//! Services: request/response effects with lifecycle actions and folded state.
//!
//! ## Contents
//! - [`Service`]         callable effect running a handler under a [`Concurrency`](crate::Concurrency) policy
//! - [`ServiceBuilder`]  namespace, bus, policy, reducer, registry
//! - [`Action`] / [`Lifecycle`] / [`LifecycleKind`]  what a service publishes
//! - [`Reducer`] / [`ReducerFn`]  fold lifecycle events into state
//! - [`ServiceObserver`] partial callback set for [`Service::observe`]
//! - [`ServiceRegistry`] stop many services at once
//!
//! ## Example
//! ```rust
//! use effectbus::{Concurrency, Service, Work};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let double = Service::effect(Concurrency::Queueing, |n: u32| Work::value(n * 2));
//!     assert_eq!(double.send(21).await, Ok(42));
//! }
//! ```

mod builder;
mod lifecycle;
#[cfg(feature = "logging")]
mod log;
mod observe;
mod reducer;
mod registry;
mod runner;

pub use builder::ServiceBuilder;
pub use lifecycle::{Action, Lifecycle, LifecycleKind};
#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use observe::ServiceObserver;
pub use reducer::{Reducer, ReducerFn, Stateless};
pub use registry::ServiceRegistry;
pub use runner::Service;
