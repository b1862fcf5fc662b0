//! # Lane scheduler: the state machine behind every [`Concurrency`] policy.
//!
//! The scheduler never runs work itself. It consumes two inputs and answers with
//! [`Step`]s the executor must apply, in order:
//!
//! ```text
//! trigger(value) ──► [Cancel(id)]* [Start(id, value) | Discard(value)]?
//! finished(id)   ──► [Start(next_id, queued_value)]?
//! ```
//!
//! ## Lane states
//! ```text
//!            trigger                    trigger (Queueing / QueueOnlyLatest)
//!   Idle ───────────────► Running(id) ───────────────► RunningWithPending(id, queue)
//!    ▲                       │   ▲                              │
//!    │   finished(id)        │   └────── finished(id), queue ───┘
//!    └───────────────────────┘           drained to one value
//!
//!   Immediate policy only: Concurrent(ids), returns to Idle once empty.
//! ```
//!
//! ## Rules
//! - Ids are allocated monotonically; a `finished` for an unknown id is ignored (stale).
//! - A value is handed out at most once, either to `Start` or to `Discard`.

use std::collections::VecDeque;

use super::Concurrency;

/// Identifier of one handling within a listener.
pub type HandlingId = u64;

/// Instruction produced by the [`Scheduler`].
#[derive(Debug, PartialEq, Eq)]
pub enum Step<V> {
    /// Cancel the handling with this id.
    Cancel(HandlingId),
    /// Start a new handling with this id for the value.
    Start(HandlingId, V),
    /// The value will never be handled.
    Discard(V),
}

/// Current state of the lane.
#[derive(Debug)]
enum Lane<V> {
    /// Nothing active.
    Idle,
    /// One handling active, nothing pending.
    Running(HandlingId),
    /// One handling active, values waiting for it to end.
    RunningWithPending(HandlingId, VecDeque<V>),
    /// Several independent handlings (`Immediate` only).
    Concurrent(Vec<HandlingId>),
}

/// Pure state machine mapping trigger values to start/cancel steps.
#[derive(Debug)]
pub struct Scheduler<V> {
    policy: Concurrency,
    lane: Lane<V>,
    hits: u32,
    next_id: HandlingId,
}

impl<V> Scheduler<V> {
    /// Creates an idle scheduler for the given policy.
    pub fn new(policy: Concurrency) -> Self {
        Self {
            policy,
            lane: Lane::Idle,
            hits: 0,
            next_id: 0,
        }
    }

    /// Returns the policy this scheduler enforces.
    pub fn policy(&self) -> Concurrency {
        self.policy
    }

    fn allocate(&mut self) -> HandlingId {
        self.next_id += 1;
        self.next_id
    }

    /// Feeds a new trigger value into the lane.
    pub fn trigger(&mut self, value: V) -> Vec<Step<V>> {
        // Sub-threshold hits are no-ops.
        if matches!(self.policy, Concurrency::ThresholdToggle { .. }) && !self.register_hit() {
            return vec![Step::Discard(value)];
        }
        let lane = std::mem::replace(&mut self.lane, Lane::Idle);

        match (lane, self.policy) {
            (Lane::Idle, Concurrency::Immediate) => {
                let id = self.allocate();
                self.lane = Lane::Concurrent(vec![id]);
                vec![Step::Start(id, value)]
            }
            (Lane::Idle, _) => {
                let id = self.allocate();
                self.lane = Lane::Running(id);
                vec![Step::Start(id, value)]
            }
            (Lane::Concurrent(mut ids), _) => {
                let id = self.allocate();
                ids.push(id);
                self.lane = Lane::Concurrent(ids);
                vec![Step::Start(id, value)]
            }
            (Lane::Running(current), Concurrency::Queueing)
            | (Lane::Running(current), Concurrency::QueueOnlyLatest) => {
                self.lane = Lane::RunningWithPending(current, VecDeque::from([value]));
                Vec::new()
            }
            (Lane::Running(current), Concurrency::Switching) => {
                let id = self.allocate();
                self.lane = Lane::Running(id);
                vec![Step::Cancel(current), Step::Start(id, value)]
            }
            (Lane::Running(current), Concurrency::Blocking) => {
                self.lane = Lane::Running(current);
                vec![Step::Discard(value)]
            }
            (Lane::Running(current), Concurrency::Toggling)
            | (Lane::Running(current), Concurrency::ThresholdToggle { .. }) => {
                self.lane = Lane::Idle;
                vec![Step::Cancel(current), Step::Discard(value)]
            }
            (Lane::Running(current), Concurrency::Immediate) => {
                let id = self.allocate();
                self.lane = Lane::Concurrent(vec![current, id]);
                vec![Step::Start(id, value)]
            }
            (Lane::RunningWithPending(current, mut queue), Concurrency::QueueOnlyLatest) => {
                let replaced: Vec<Step<V>> = queue.drain(..).map(Step::Discard).collect();
                queue.push_back(value);
                self.lane = Lane::RunningWithPending(current, queue);
                replaced
            }
            (Lane::RunningWithPending(current, mut queue), _) => {
                queue.push_back(value);
                self.lane = Lane::RunningWithPending(current, queue);
                Vec::new()
            }
        }
    }

    /// Counts one toggle hit; returns `true` when the threshold is reached.
    fn register_hit(&mut self) -> bool {
        self.hits += 1;
        if self.hits >= self.policy.toggle_threshold() {
            self.hits = 0;
            true
        } else {
            false
        }
    }

    /// Reports that a handling reached a terminal state.
    ///
    /// Returns the next handling to start, if one was waiting.
    pub fn finished(&mut self, id: HandlingId) -> Option<Step<V>> {
        let lane = std::mem::replace(&mut self.lane, Lane::Idle);

        match lane {
            Lane::Running(current) if current == id => None,
            Lane::RunningWithPending(current, mut queue) if current == id => {
                let value = queue.pop_front()?;
                let next = self.allocate();
                self.lane = if queue.is_empty() {
                    Lane::Running(next)
                } else {
                    Lane::RunningWithPending(next, queue)
                };
                Some(Step::Start(next, value))
            }
            Lane::Concurrent(mut ids) => {
                ids.retain(|active| *active != id);
                if !ids.is_empty() {
                    self.lane = Lane::Concurrent(ids);
                }
                None
            }
            other => {
                self.lane = other;
                None
            }
        }
    }

    /// Ids of the handlings currently active.
    pub fn running(&self) -> Vec<HandlingId> {
        match &self.lane {
            Lane::Idle => Vec::new(),
            Lane::Running(id) | Lane::RunningWithPending(id, _) => vec![*id],
            Lane::Concurrent(ids) => ids.clone(),
        }
    }

    /// Number of values waiting for the active handling to end.
    pub fn pending(&self) -> usize {
        match &self.lane {
            Lane::RunningWithPending(_, queue) => queue.len(),
            _ => 0,
        }
    }

    /// Discards every pending value and any partial toggle hits.
    ///
    /// Returns the discarded values in arrival order.
    pub fn clear_pending(&mut self) -> Vec<V> {
        self.hits = 0;
        let lane = std::mem::replace(&mut self.lane, Lane::Idle);
        match lane {
            Lane::RunningWithPending(current, queue) => {
                self.lane = Lane::Running(current);
                queue.into()
            }
            other => {
                self.lane = other;
                Vec::new()
            }
        }
    }

    /// Returns `true` when no handling is active.
    pub fn is_idle(&self) -> bool {
        matches!(self.lane, Lane::Idle)
    }
}
