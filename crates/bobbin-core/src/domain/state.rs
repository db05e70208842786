//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task state. Each state corresponds to one state-set of the owning queue.
///
/// State transitions:
/// - Scheduled -> Pending (process_at reached)
/// - Pending -> Active (dequeued by a worker)
/// - Active -> Completed (ack)
/// - Active -> Retry -> Pending (failed, retry budget left)
/// - Active -> Dead (retry budget exhausted, no handler, permanent failure)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for `process_at`.
    Scheduled,

    /// Eligible for dequeue.
    Pending,

    /// Leased by a worker.
    Active,

    /// Waiting for the backoff delay after a failed attempt.
    Retry,

    /// Successfully processed; kept for `retention`.
    Completed,

    /// Dead-lettered. Never retried automatically.
    Dead,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Scheduled,
        TaskState::Pending,
        TaskState::Active,
        TaskState::Retry,
        TaskState::Completed,
        TaskState::Dead,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Dead)
    }

    /// Is this task waiting on a timestamp before it may run?
    pub fn is_delayed(self) -> bool {
        matches!(self, TaskState::Scheduled | TaskState::Retry)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Scheduled => "scheduled",
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::Retry => "retry",
            TaskState::Completed => "completed",
            TaskState::Dead => "dead",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
