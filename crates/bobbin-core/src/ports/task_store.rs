//! TaskStore port - 永続ストアが実装する正本（source of truth）
//!
//! TaskStore はキューごとに state-set（scheduled / pending / active / retry /
//! completed / dead）を持ち、task をそれらの間で移動させます。
//!
//! # 設計原則
//! - すべての移動は store から見て atomic（二つの set に同時に入らない、どこにも入らない瞬間もない）
//! - Lease の権威はここにある（pending -> active の移動が二重 dequeue を防ぐ）
//! - 時刻は呼び出し側が渡す（store は時計を持たない）

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DeadReason, StoreError, TaskId, TaskInfo, TaskRecord, TaskState};

/// Per-state task counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub scheduled: usize,
    pub pending: usize,
    pub active: usize,
    pub retry: usize,
    pub completed: usize,
    pub dead: usize,
}

impl QueueCounts {
    pub fn get(&self, state: TaskState) -> usize {
        match state {
            TaskState::Scheduled => self.scheduled,
            TaskState::Pending => self.pending,
            TaskState::Active => self.active,
            TaskState::Retry => self.retry,
            TaskState::Completed => self.completed,
            TaskState::Dead => self.dead,
        }
    }

    pub fn total(&self) -> usize {
        TaskState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

/// Contract the engine needs from the durable store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task into Scheduled (future `process_at`) or Pending.
    ///
    /// A duplicate id is rejected with `DuplicateId` and leaves the store untouched.
    async fn enqueue(&self, record: TaskRecord, now: DateTime<Utc>) -> Result<TaskInfo, StoreError>;

    /// Move one Pending task to Active, trying `queues` in the given order.
    async fn dequeue(
        &self,
        queues: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// Active -> Completed. Metadata is kept for the task's retention.
    async fn ack(&self, id: TaskId, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Active -> Retry with `process_at = now + delay`; increments `retry_count`.
    async fn retry(
        &self,
        id: TaskId,
        delay: Duration,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<TaskInfo, StoreError>;

    /// Move to Dead. Never retried automatically.
    async fn kill(
        &self,
        id: TaskId,
        reason: DeadReason,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Scheduled/Retry tasks with `process_at <= now` -> Pending. Returns how many moved.
    async fn promote_scheduled(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Active tasks whose lease expired at or before `cutoff`.
    async fn expired_leases(&self, cutoff: DateTime<Utc>) -> Result<Vec<TaskRecord>, StoreError>;

    /// Drop Completed tasks whose retention window has passed.
    async fn purge_completed(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Records of one queue currently in `state`.
    async fn list(&self, queue: &str, state: TaskState) -> Result<Vec<TaskRecord>, StoreError>;

    /// Counts keyed by queue name.
    async fn counts(&self) -> Result<BTreeMap<String, QueueCounts>, StoreError>;

    /// Block until new work may be available, or `max_wait` elapses.
    ///
    /// Stores without a push signal simply sleep; workers then poll again.
    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }
}
