//! Task record: the full task entity as persisted by the store.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DeadReason;
use super::ids::TaskId;
use super::options::TaskInfo;
use super::state::TaskState;
use super::task::TaskType;

/// Convert a std duration into a chrono delta, saturating on overflow.
pub fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// `at + d`, clamped to the latest representable instant.
pub fn add_duration(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    at.checked_add_signed(to_delta(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - d`, clamped to the earliest representable instant.
pub fn sub_duration(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(to_delta(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Metadata + payload for a task.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - Store state-sets hold TaskId only.
/// - All state transitions happen here; the store decides *when* to call them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,

    /// Opaque bytes; the handler decides how to interpret them.
    pub payload: Vec<u8>,

    pub queue: String,
    pub state: TaskState,

    pub max_retry: u32,

    /// Number of failed attempts that were scheduled for retry.
    pub retry_count: u32,

    /// Budget for a single execution attempt.
    pub timeout: Duration,

    /// How long a completed task stays inspectable.
    pub retention: Duration,

    /// Not eligible before this instant (Scheduled / Retry).
    pub process_at: Option<DateTime<Utc>>,

    pub last_error: Option<String>,
    pub dead_reason: Option<DeadReason>,

    /// Set while Active.
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A fresh record; `place` decides its initial state-set.
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        payload: Vec<u8>,
        queue: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            payload,
            queue: queue.into(),
            state: TaskState::Pending,
            max_retry: 0,
            retry_count: 0,
            timeout: Duration::ZERO,
            retention: Duration::ZERO,
            process_at: None,
            last_error: None,
            dead_reason: None,
            lease_expires_at: None,
            completed_at: None,
            enqueued_at: now,
            updated_at: now,
        }
    }

    /// Scheduled when `process_at` is in the future, otherwise Pending.
    pub fn place(&mut self, now: DateTime<Utc>) {
        self.state = match self.process_at {
            Some(at) if at > now => TaskState::Scheduled,
            _ => TaskState::Pending,
        };
        self.updated_at = now;
    }

    /// Scheduled/Retry -> Pending.
    pub fn promote(&mut self, now: DateTime<Utc>) {
        self.state = TaskState::Pending;
        self.updated_at = now;
    }

    /// Pending -> Active, lease bounded by the task timeout.
    pub fn start_lease(&mut self, now: DateTime<Utc>) {
        self.lease_expires_at = Some(add_duration(now, self.timeout));
        self.state = TaskState::Active;
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.state = TaskState::Completed;
        self.lease_expires_at = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Active -> Retry; counts the failed attempt.
    pub fn schedule_retry(&mut self, process_at: DateTime<Utc>, error: String, now: DateTime<Utc>) {
        self.state = TaskState::Retry;
        self.retry_count += 1;
        self.process_at = Some(process_at);
        self.last_error = Some(error);
        self.lease_expires_at = None;
        self.updated_at = now;
    }

    pub fn mark_dead(&mut self, reason: DeadReason, error: String, now: DateTime<Utc>) {
        self.state = TaskState::Dead;
        self.dead_reason = Some(reason);
        self.last_error = Some(error);
        self.lease_expires_at = None;
        self.updated_at = now;
    }

    /// Retry budget left for another attempt?
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retry
    }

    /// When a completed task may be purged.
    pub fn retention_expires_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
            .map(|at| add_duration(at, self.retention))
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            task_id: self.id,
            task_type: self.task_type.clone(),
            queue: self.queue.clone(),
            state: self.state,
            max_retry: self.max_retry,
            retry_count: self.retry_count,
            timeout: self.timeout,
            retention: self.retention,
            next_process_at: self
                .process_at
                .filter(|_| self.state.is_delayed())
                .unwrap_or(self.enqueued_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn record(now: DateTime<Utc>) -> TaskRecord {
        let mut r = TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            TaskType::new("t"),
            b"{}".to_vec(),
            "default",
            now,
        );
        r.max_retry = 2;
        r.timeout = Duration::from_secs(30);
        r
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn place_uses_process_at() {
        let now = t0();
        let mut r = record(now);
        r.place(now);
        assert_eq!(r.state, TaskState::Pending);

        r.process_at = Some(now + TimeDelta::seconds(3));
        r.place(now);
        assert_eq!(r.state, TaskState::Scheduled);
        assert_eq!(r.info().next_process_at, now + TimeDelta::seconds(3));
    }

    #[test]
    fn lease_expires_after_timeout() {
        let now = t0();
        let mut r = record(now);
        r.start_lease(now);
        assert_eq!(r.state, TaskState::Active);
        assert_eq!(r.lease_expires_at, Some(now + TimeDelta::seconds(30)));
    }

    #[test]
    fn retry_counts_and_budget() {
        let now = t0();
        let mut r = record(now);
        assert!(r.can_retry());
        r.schedule_retry(now, "e1".into(), now);
        r.schedule_retry(now, "e2".into(), now);
        assert_eq!(r.retry_count, 2);
        assert!(!r.can_retry());
        assert_eq!(r.last_error.as_deref(), Some("e2"));
    }

    #[test]
    fn retention_window_starts_at_completion() {
        let now = t0();
        let mut r = record(now);
        r.retention = Duration::from_secs(60);
        assert_eq!(r.retention_expires_at(), None);
        r.mark_completed(now);
        assert_eq!(r.retention_expires_at(), Some(now + TimeDelta::seconds(60)));
    }

    #[test]
    fn unbounded_durations_clamp_instead_of_overflowing() {
        let now = t0();
        let mut r = record(now);
        r.timeout = Duration::MAX;
        r.start_lease(now);
        assert_eq!(r.state, TaskState::Active);
        assert_eq!(r.lease_expires_at, Some(DateTime::<Utc>::MAX_UTC));

        r.retention = Duration::MAX;
        r.mark_completed(now);
        assert_eq!(r.retention_expires_at(), Some(DateTime::<Utc>::MAX_UTC));

        assert_eq!(sub_duration(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
