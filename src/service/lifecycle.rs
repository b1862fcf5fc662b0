//! # Lifecycle actions published by a service.
//!
//! Every request handled by a [`Service`](crate::Service) walks through a fixed
//! sequence of lifecycle events, each published on the service's bus as an
//! [`Action`]:
//!
//! ```text
//! request ─► started ─► next* ─► complete | error | canceled
//! request ─────────────────────► canceled                      (dropped by the policy)
//! ```
//!
//! ## Ordering guarantees
//! Each action has a globally unique sequence number (`seq`) that increases monotonically.
//! All actions belonging to one request share the same `cause`: the `seq` of its
//! `request` action.
//!
//! ## Example
//! ```rust
//! use effectbus::{Action, Lifecycle, LifecycleKind};
//!
//! let action: Action<&str, u32> = Action::new("search", Lifecycle::Next(3));
//! assert_eq!(action.kind(), LifecycleKind::Next);
//! assert_eq!(action.type_name(), "search/next");
//! assert!(action.is("search", LifecycleKind::Next));
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::error::HandlerError;

/// Global sequence counter for action ordering.
static ACTION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    /// A caller asked for work.
    Request,
    /// A handling began for a request.
    Started,
    /// The handling produced a value.
    Next,
    /// The handling failed.
    Error,
    /// The handling finished.
    Complete,
    /// The handling was canceled, or the request was dropped before it started.
    Canceled,
}

impl LifecycleKind {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleKind::Request => "request",
            LifecycleKind::Started => "started",
            LifecycleKind::Next => "next",
            LifecycleKind::Error => "error",
            LifecycleKind::Complete => "complete",
            LifecycleKind::Canceled => "canceled",
        }
    }

    /// `true` for the kinds that end a request.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleKind::Error | LifecycleKind::Complete | LifecycleKind::Canceled
        )
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One lifecycle event with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle<Req, Res> {
    Request(Req),
    Started(Req),
    Next(Res),
    Error(HandlerError),
    Complete(Req),
    Canceled(Req),
}

impl<Req, Res> Lifecycle<Req, Res> {
    pub fn kind(&self) -> LifecycleKind {
        match self {
            Lifecycle::Request(_) => LifecycleKind::Request,
            Lifecycle::Started(_) => LifecycleKind::Started,
            Lifecycle::Next(_) => LifecycleKind::Next,
            Lifecycle::Error(_) => LifecycleKind::Error,
            Lifecycle::Complete(_) => LifecycleKind::Complete,
            Lifecycle::Canceled(_) => LifecycleKind::Canceled,
        }
    }

    /// The request payload, for every kind that carries one.
    pub fn request(&self) -> Option<&Req> {
        match self {
            Lifecycle::Request(req)
            | Lifecycle::Started(req)
            | Lifecycle::Complete(req)
            | Lifecycle::Canceled(req) => Some(req),
            Lifecycle::Next(_) | Lifecycle::Error(_) => None,
        }
    }

    pub fn response(&self) -> Option<&Res> {
        match self {
            Lifecycle::Next(res) => Some(res),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&HandlerError> {
        match self {
            Lifecycle::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_request(self) -> Option<Req> {
        match self {
            Lifecycle::Request(req)
            | Lifecycle::Started(req)
            | Lifecycle::Complete(req)
            | Lifecycle::Canceled(req) => Some(req),
            Lifecycle::Next(_) | Lifecycle::Error(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Res> {
        match self {
            Lifecycle::Next(res) => Some(res),
            _ => None,
        }
    }

    pub fn into_error(self) -> Option<HandlerError> {
        match self {
            Lifecycle::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Lifecycle event addressed to a service namespace.
///
/// - `seq`: monotonic global sequence for ordering
/// - `namespace`: name of the service the event belongs to
/// - `cause`: `seq` of the request action this event belongs to
#[derive(Clone, PartialEq, Eq)]
pub struct Action<Req, Res> {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Namespace of the owning service.
    pub namespace: Arc<str>,
    /// Sequence number of the originating request, if known.
    pub cause: Option<u64>,
    /// The lifecycle event itself.
    pub event: Lifecycle<Req, Res>,

    /// Cancel epoch captured when a service issued the request.
    pub(crate) epoch: Option<u64>,
}

impl<Req, Res> Action<Req, Res> {
    /// Creates an action with the next sequence number.
    pub fn new(namespace: impl Into<Arc<str>>, event: Lifecycle<Req, Res>) -> Self {
        Self {
            seq: ACTION_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            namespace: namespace.into(),
            cause: None,
            event,
            epoch: None,
        }
    }

    /// Attaches the originating request's sequence number.
    #[inline]
    pub fn with_cause(mut self, cause: u64) -> Self {
        self.cause = Some(cause);
        self
    }

    #[inline]
    pub(crate) fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = Some(epoch);
        self
    }

    #[inline]
    pub fn kind(&self) -> LifecycleKind {
        self.event.kind()
    }

    /// Returns `"<namespace>/<kind>"`.
    pub fn type_name(&self) -> String {
        format!("{}/{}", self.namespace, self.kind())
    }

    /// `true` if the action belongs to `namespace` and has the given kind.
    #[inline]
    pub fn is(&self, namespace: &str, kind: LifecycleKind) -> bool {
        self.kind() == kind && &*self.namespace == namespace
    }

    #[inline]
    pub fn belongs_to(&self, namespace: &str) -> bool {
        &*self.namespace == namespace
    }
}

impl<Req: fmt::Debug, Res: fmt::Debug> fmt::Debug for Action<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("seq", &self.seq)
            .field("type", &self.type_name())
            .field("cause", &self.cause)
            .field("event", &self.event)
            .finish()
    }
}
