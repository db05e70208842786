//! Enqueue options and the info returned for an accepted task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::state::TaskState;
use super::task::TaskType;

/// Per-call overrides for `Client::enqueue`.
///
/// Unset fields fall back to the engine's task defaults.
/// `process_in` and `process_at` are mutually exclusive; with neither set the
/// task is immediately eligible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub queue: Option<String>,
    pub max_retry: Option<u32>,
    pub timeout: Option<Duration>,
    pub process_in: Option<Duration>,
    pub process_at: Option<DateTime<Utc>>,
    pub retention: Option<Duration>,

    /// Caller-chosen id, for producers that retry their own enqueue.
    pub task_id: Option<TaskId>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn process_in(mut self, delay: Duration) -> Self {
        self.process_in = Some(delay);
        self
    }

    pub fn process_at(mut self, at: DateTime<Utc>) -> Self {
        self.process_at = Some(at);
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn task_id(mut self, id: TaskId) -> Self {
        self.task_id = Some(id);
        self
    }
}

/// What the producer gets back once a task is durably written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub queue: String,
    pub state: TaskState,
    pub max_retry: u32,
    pub retry_count: u32,
    pub timeout: Duration,
    pub retention: Duration,

    /// Earliest time the task may be dequeued.
    pub next_process_at: DateTime<Utc>,
}
