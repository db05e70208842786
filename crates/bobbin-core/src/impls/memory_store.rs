//! InMemoryTaskStore - 開発・テスト用の TaskStore
//!
//! 本番では外部の永続ストア（Redis の sorted set など）がこの役割を持ちます。
//! ここでは一つの Mutex の中で state-set 間の移動を完結させることで、
//! 外部ストアの atomic な move を再現しています。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::domain::record::add_duration;
use crate::domain::{DeadReason, StoreError, TaskId, TaskInfo, TaskRecord, TaskState};
use crate::ports::{QueueCounts, TaskStore};

/// Time-ordered set entry (scheduled / retry / completed sets).
///
/// Ordered by time first, then by id, so ties stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledTask {
    at: DateTime<Utc>,
    task_id: TaskId,
}

/// The state-sets of one queue. They hold TaskIds only.
#[derive(Debug, Default)]
struct QueueSets {
    scheduled: BTreeSet<ScheduledTask>,
    pending: VecDeque<TaskId>,
    active: HashSet<TaskId>,
    retry: BTreeSet<ScheduledTask>,
    completed: BTreeSet<ScheduledTask>,
    dead: HashSet<TaskId>,
}

impl QueueSets {
    /// Remove `record` from the set matching its current state.
    fn detach(&mut self, record: &TaskRecord) {
        match record.state {
            TaskState::Scheduled | TaskState::Retry => {
                let entry = ScheduledTask {
                    at: record.process_at.unwrap_or(record.enqueued_at),
                    task_id: record.id,
                };
                self.scheduled.remove(&entry);
                self.retry.remove(&entry);
            }
            TaskState::Pending => self.pending.retain(|id| *id != record.id),
            TaskState::Active => {
                self.active.remove(&record.id);
            }
            TaskState::Completed => {
                self.completed.retain(|e| e.task_id != record.id);
            }
            TaskState::Dead => {
                self.dead.remove(&record.id);
            }
        }
    }

    /// Add `record` to the set matching its current state.
    fn attach(&mut self, record: &TaskRecord) {
        let timed = |at: Option<DateTime<Utc>>| ScheduledTask {
            at: at.unwrap_or(record.updated_at),
            task_id: record.id,
        };
        match record.state {
            TaskState::Scheduled => {
                self.scheduled.insert(timed(record.process_at));
            }
            TaskState::Retry => {
                self.retry.insert(timed(record.process_at));
            }
            TaskState::Pending => self.pending.push_back(record.id),
            TaskState::Active => {
                self.active.insert(record.id);
            }
            TaskState::Completed => {
                self.completed.insert(timed(record.retention_expires_at()));
            }
            TaskState::Dead => {
                self.dead.insert(record.id);
            }
        }
    }

    fn counts(&self) -> QueueCounts {
        QueueCounts {
            scheduled: self.scheduled.len(),
            pending: self.pending.len(),
            active: self.active.len(),
            retry: self.retry.len(),
            completed: self.completed.len(),
            dead: self.dead.len(),
        }
    }

    /// Pop every entry with `at <= now` from a time-ordered set.
    fn take_due(set: &mut BTreeSet<ScheduledTask>, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut due = Vec::new();
        while let Some(entry) = set.first() {
            if entry.at > now {
                break; // sorted, so we can stop
            }
            if let Some(entry) = set.pop_first() {
                due.push(entry.task_id);
            }
        }
        due
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    /// All task records (single source of truth).
    records: HashMap<TaskId, TaskRecord>,

    /// State-sets per queue name.
    queues: HashMap<String, QueueSets>,
}

impl MemoryState {
    /// Move a record between state-sets inside one critical section.
    fn transition<F>(
        &mut self,
        id: TaskId,
        op: &'static str,
        expect: &[TaskState],
        f: F,
    ) -> Result<&TaskRecord, StoreError>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let MemoryState { records, queues } = self;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !expect.contains(&record.state) {
            return Err(StoreError::InvalidTransition {
                id,
                state: record.state,
                op,
            });
        }
        let sets = queues.entry(record.queue.clone()).or_default();
        sets.detach(record);
        f(record);
        sets.attach(record);
        Ok(record)
    }
}

/// In-memory TaskStore.
pub struct InMemoryTaskStore {
    state: Mutex<MemoryState>,
    notify: Notify,
    available: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            notify: Notify::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails with `Unavailable` until restored.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store is offline".to_string()))
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn enqueue(
        &self,
        mut record: TaskRecord,
        now: DateTime<Utc>,
    ) -> Result<TaskInfo, StoreError> {
        self.check_available()?;
        let info = {
            let mut state = self.state.lock().await;
            if state.records.contains_key(&record.id) {
                return Err(StoreError::DuplicateId(record.id));
            }
            record.place(now);
            state
                .queues
                .entry(record.queue.clone())
                .or_default()
                .attach(&record);
            let info = record.info();
            state.records.insert(record.id, record);
            info
        };

        if info.state == TaskState::Pending {
            self.notify.notify_one();
        }
        Ok(info)
    }

    async fn dequeue(
        &self,
        queues: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let MemoryState { records, queues: all } = &mut *state;

        for name in queues {
            let Some(sets) = all.get_mut(name) else {
                continue;
            };
            while let Some(task_id) = sets.pending.pop_front() {
                let Some(record) = records.get_mut(&task_id) else {
                    continue;
                };
                record.start_lease(now);
                sets.active.insert(task_id);
                return Ok(Some(record.clone()));
            }
        }
        Ok(None)
    }

    async fn ack(&self, id: TaskId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.transition(id, "ack", &[TaskState::Active], |r| r.mark_completed(now))?;
        Ok(())
    }

    async fn retry(
        &self,
        id: TaskId,
        delay: Duration,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<TaskInfo, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let process_at = add_duration(now, delay);
        let record = state.transition(id, "retry", &[TaskState::Active], |r| {
            r.schedule_retry(process_at, error, now)
        })?;
        Ok(record.info())
    }

    async fn kill(
        &self,
        id: TaskId,
        reason: DeadReason,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let live = [
            TaskState::Scheduled,
            TaskState::Pending,
            TaskState::Active,
            TaskState::Retry,
        ];
        state.transition(id, "kill", &live, |r| r.mark_dead(reason, error, now))?;
        Ok(())
    }

    async fn promote_scheduled(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check_available()?;
        let moved = {
            let mut state = self.state.lock().await;
            let MemoryState { records, queues } = &mut *state;
            let mut moved = 0;
            for sets in queues.values_mut() {
                let mut due = QueueSets::take_due(&mut sets.scheduled, now);
                due.extend(QueueSets::take_due(&mut sets.retry, now));
                for task_id in due {
                    if let Some(record) = records.get_mut(&task_id)
                        && record.state.is_delayed()
                    {
                        record.promote(now);
                        sets.pending.push_back(task_id);
                        moved += 1;
                    }
                }
            }
            moved
        };

        for _ in 0..moved {
            self.notify.notify_one();
        }
        Ok(moved)
    }

    async fn expired_leases(&self, cutoff: DateTime<Utc>) -> Result<Vec<TaskRecord>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut expired: Vec<TaskRecord> = state
            .queues
            .values()
            .flat_map(|sets| sets.active.iter())
            .filter_map(|id| state.records.get(id))
            .filter(|r| r.lease_expires_at.is_some_and(|at| at <= cutoff))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.id);
        Ok(expired)
    }

    async fn purge_completed(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let MemoryState { records, queues } = &mut *state;
        let mut purged = 0;
        for sets in queues.values_mut() {
            for task_id in QueueSets::take_due(&mut sets.completed, now) {
                records.remove(&task_id);
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn list(
        &self,
        queue: &str,
        task_state: TaskState,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut out: Vec<TaskRecord> = state
            .records
            .values()
            .filter(|r| r.queue == queue && r.state == task_state)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    async fn counts(&self) -> Result<BTreeMap<String, QueueCounts>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .queues
            .iter()
            .map(|(name, sets)| (name.clone(), sets.counts()))
            .collect())
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }
}
