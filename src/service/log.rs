//! # LogWriter: lifecycle action printer
//!
//! A minimal spy that records every lifecycle action on a bus as one
//! `tracing::info!` line. Use it for tests or demos.
//!
//! ## Example output
//! ```text
//! [request] namespace="search" seq=4 cause=Some(4)
//! [started] namespace="search" seq=5 cause=Some(4)
//! [next] namespace="search" seq=6 cause=Some(4)
//! [error] namespace="search" seq=7 cause=Some(4) err="handler failed: offline"
//! [canceled] namespace="search" seq=9 cause=Some(8)
//! ```

use crate::bus::{Bus, Registration};

use super::{Action, Lifecycle};

/// Lifecycle action writer.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Starts logging every action published on `bus`.
    pub fn attach<Req, Res>(self, bus: &Bus<Action<Req, Res>>) -> Registration
    where
        Req: Clone + Send + 'static,
        Res: Clone + Send + 'static,
    {
        bus.spy(move |action| self.write(action))
    }

    fn write<Req, Res>(&self, a: &Action<Req, Res>) {
        tracing::info!("{}", render(a));
    }
}

fn render<Req, Res>(a: &Action<Req, Res>) -> String {
    let kind = a.kind().as_label();
    match &a.event {
        Lifecycle::Error(err) => format!(
            "[{kind}] namespace={:?} seq={} cause={:?} err={:?}",
            a.namespace,
            a.seq,
            a.cause,
            err.to_string()
        ),
        _ => format!(
            "[{kind}] namespace={:?} seq={} cause={:?}",
            a.namespace, a.seq, a.cause
        ),
    }
}
