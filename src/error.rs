//! Error types used by the bus, its listeners and services.
//!
//! This module defines two main error enums:
//!
//! - [`HandlerError`]: failures raised by user callbacks (handlers, reducers, guards, filters).
//! - [`BusError`]: failures returned to callers of bus and service operations.
//!
//! Both types provide helper methods (`as_label`, `as_message`) for logging/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by user callbacks.
///
/// A handler error never escapes [`Bus::trigger`](crate::Bus::trigger) when it comes from a
/// listener: it is delivered to the listener's `on_error` callback or, when there is none,
/// published on the bus error stream.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The callback reported a failure.
    #[error("handler failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The callback panicked; the panic was caught and converted.
    #[error("handler panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// Produced work did not finish within its timeout.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Fail`].
    ///
    /// # Example
    /// ```
    /// use effectbus::HandlerError;
    ///
    /// let err = HandlerError::fail("boom");
    /// assert_eq!(err.to_string(), "handler failed: boom");
    /// ```
    pub fn fail(error: impl std::fmt::Display) -> Self {
        HandlerError::Fail {
            error: error.to_string(),
        }
    }

    /// Builds a [`HandlerError::Panicked`] from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let info = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        HandlerError::Panicked { info }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use effectbus::HandlerError;
    /// use std::time::Duration;
    ///
    /// let err = HandlerError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "handler_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Fail { .. } => "handler_failed",
            HandlerError::Panicked { .. } => "handler_panicked",
            HandlerError::Timeout { .. } => "handler_timeout",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            HandlerError::Fail { error } => format!("error: {error}"),
            HandlerError::Panicked { info } => format!("panic: {info}"),
            HandlerError::Timeout { timeout } => format!("timeout: {timeout:?}"),
        }
    }
}

/// # Errors returned by bus and service operations.
///
/// Guard and filter failures are the only errors a [`trigger`](crate::Bus::trigger) call
/// can observe; the remaining variants describe why a pending result never arrived.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A guard rejected the event; nothing downstream saw it.
    #[error("guard rejected event: {source}")]
    Guard {
        /// The guard's failure.
        source: HandlerError,
    },

    /// A filter failed while transforming the event; nothing downstream saw it.
    #[error("filter failed: {source}")]
    Filter {
        /// The filter's failure.
        source: HandlerError,
    },

    /// The bus was reset before the awaited event arrived.
    #[error("bus was reset")]
    Reset,

    /// The service no longer accepts requests.
    #[error("service stopped")]
    Stopped,

    /// The handling for this request was canceled.
    #[error("handling canceled")]
    Canceled,

    /// The handling completed without producing a value.
    #[error("handling completed without a response")]
    NoResponse,

    /// The handling for this request failed.
    #[error("handling failed: {source}")]
    Handler {
        /// The handler's failure.
        source: HandlerError,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use effectbus::BusError;
    ///
    /// assert_eq!(BusError::Reset.as_label(), "bus_reset");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::Guard { .. } => "bus_guard_rejected",
            BusError::Filter { .. } => "bus_filter_failed",
            BusError::Reset => "bus_reset",
            BusError::Stopped => "service_stopped",
            BusError::Canceled => "handling_canceled",
            BusError::NoResponse => "handling_no_response",
            BusError::Handler { .. } => "handling_failed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            BusError::Guard { source } => format!("guard: {}", source.as_message()),
            BusError::Filter { source } => format!("filter: {}", source.as_message()),
            BusError::Reset => "bus reset".to_string(),
            BusError::Stopped => "service stopped".to_string(),
            BusError::Canceled => "handling canceled".to_string(),
            BusError::NoResponse => "no response".to_string(),
            BusError::Handler { source } => format!("handler: {}", source.as_message()),
        }
    }

    /// Indicates whether the failure happened synchronously inside `trigger`.
    pub fn is_trigger_failure(&self) -> bool {
        matches!(self, BusError::Guard { .. } | BusError::Filter { .. })
    }
}
