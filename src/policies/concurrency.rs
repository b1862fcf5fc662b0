//! # Concurrency policy for a listener
//!
//! A listener is a **lane** of handlings. When a new event arrives while a
//! handling is active, the policy decides what to do.
//!
//! ## Variants
//! - `Immediate`: start a new concurrent handling right away.
//! - `Queueing`: enqueue the event (FIFO); start it once the active one ends.
//! - `Switching`: cancel the active handling and start the new one.
//! - `Blocking`: **ignore** the new event.
//! - `Toggling`: cancel the active handling and start nothing.
//! - `QueueOnlyLatest`: keep only the most recent pending event (queue depth 1).
//! - `ThresholdToggle`: like `Toggling`, but only every `hits`-th event toggles.
//!
//! ## Invariants
//! - Discarded events never reach the handler.
//! - Queued events start strictly in arrival order.

/// Policy controlling how new events are handled when a listener is busy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Concurrency {
    /// Start every handling immediately (unbounded concurrency).
    ///
    /// Use when:
    /// - Handlings are independent
    /// - Completion order does not matter
    #[default]
    Immediate,

    /// Queue the event (FIFO order).
    ///
    /// Use when:
    /// - All events must be handled
    /// - Order matters
    /// - Example: sequential writes
    Queueing,

    /// Cancel the current handling and start the new one immediately.
    ///
    /// Use when:
    /// - A new event invalidates the old one
    /// - Example: search-as-you-type
    Switching,

    /// Drop the event if a handling is active.
    ///
    /// Use when:
    /// - Redundant work should be avoided
    /// - Example: a submit button pressed twice
    Blocking,

    /// Start a handling when idle, cancel it when active.
    ///
    /// Use when:
    /// - Each event flips an on/off state
    /// - Example: start/stop a recording
    Toggling,

    /// Start when idle; while active, remember only the latest event.
    ///
    /// Use when:
    /// - Only the freshest request matters, but the current one must finish
    /// - Example: autosave
    QueueOnlyLatest,

    /// Accumulate hits; every `hits`-th one toggles like [`Concurrency::Toggling`].
    ///
    /// `hits = 0` behaves like `hits = 1`.
    ThresholdToggle {
        /// Number of events needed to flip the state.
        hits: u32,
    },
}

impl Concurrency {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Concurrency::Immediate => "immediate",
            Concurrency::Queueing => "queueing",
            Concurrency::Switching => "switching",
            Concurrency::Blocking => "blocking",
            Concurrency::Toggling => "toggling",
            Concurrency::QueueOnlyLatest => "queue_only_latest",
            Concurrency::ThresholdToggle { .. } => "threshold_toggle",
        }
    }

    /// Number of events needed to flip a toggling lane.
    #[inline]
    pub(crate) fn toggle_threshold(&self) -> u32 {
        match self {
            Concurrency::ThresholdToggle { hits } => (*hits).max(1),
            _ => 1,
        }
    }
}
