//! Client - Producer 側の入口
//!
//! 呼び出し元に同期的に返るのは validation エラーと store の可用性エラーだけです。
//! `Ok(TaskInfo)` が返った時点で task は store に書き込まれています。

use std::sync::Arc;
use std::time::Duration;

use crate::domain::record::add_duration;
use crate::domain::{
    DEFAULT_QUEUE, EnqueueError, EnqueueOptions, TaskInfo, TaskRecord, TaskType,
    is_valid_queue_name,
};
use crate::ports::{Clock, IdGenerator, TaskStore};
use crate::typed::{PayloadCodec, Task};

use super::store_retry::StoreRetry;

/// Values used for options the caller leaves unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefaults {
    pub queue: String,
    pub max_retry: u32,
    pub timeout: Duration,
    pub retention: Duration,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            max_retry: 3,
            timeout: Duration::from_secs(30 * 60),
            retention: Duration::ZERO,
        }
    }
}

/// Submits tasks to the store. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    defaults: TaskDefaults,
    store_retry: StoreRetry,
}

impl Client {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            defaults: TaskDefaults::default(),
            store_retry: StoreRetry::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: TaskDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_store_retry(mut self, store_retry: StoreRetry) -> Self {
        self.store_retry = store_retry;
        self
    }

    pub fn defaults(&self) -> &TaskDefaults {
        &self.defaults
    }

    /// Enqueue a typed task, encoding it as JSON.
    pub async fn enqueue_task<T: Task>(
        &self,
        task: &T,
        options: EnqueueOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        let payload =
            PayloadCodec::encode(task).map_err(|e| EnqueueError::PayloadEncoding(e.to_string()))?;
        self.enqueue(T::TYPE, payload, options).await
    }

    /// Enqueue raw payload bytes for `task_type`.
    pub async fn enqueue(
        &self,
        task_type: impl Into<TaskType>,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        let record = self.build_record(task_type.into(), payload, options)?;
        let now = record.enqueued_at;

        let info = self
            .store_retry
            .run("enqueue", || self.store.enqueue(record.clone(), now))
            .await?;

        tracing::debug!(
            task_id = %info.task_id,
            task_type = %info.task_type,
            queue = %info.queue,
            state = %info.state,
            "task enqueued"
        );
        Ok(info)
    }

    fn build_record(
        &self,
        task_type: TaskType,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<TaskRecord, EnqueueError> {
        if !task_type.is_valid() {
            return Err(EnqueueError::InvalidTaskType);
        }
        let queue = options.queue.unwrap_or_else(|| self.defaults.queue.clone());
        if !is_valid_queue_name(&queue) {
            return Err(EnqueueError::InvalidQueue(queue));
        }

        let now = self.clock.now();
        let process_at = match (options.process_in, options.process_at) {
            (Some(_), Some(_)) => return Err(EnqueueError::ConflictingSchedule),
            (Some(delay), None) => Some(add_duration(now, delay)),
            (None, at) => at,
        };

        let id = options
            .task_id
            .unwrap_or_else(|| self.ids.generate_task_id());
        let mut record = TaskRecord::new(id, task_type, payload, queue, now);
        record.max_retry = options.max_retry.unwrap_or(self.defaults.max_retry);
        record.timeout = options
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.defaults.timeout);
        record.retention = options.retention.unwrap_or(self.defaults.retention);
        record.process_at = process_at;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskState};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{FixedClock, UlidGenerator};
    use crate::typed::task::fixtures::WelcomeEmail;
    use chrono::{TimeDelta, TimeZone, Utc};
    use ulid::Ulid;

    struct Fixture {
        store: Arc<InMemoryTaskStore>,
        clock: FixedClock,
        client: Client,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryTaskStore::new());
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        let client = Client::new(
            store.clone(),
            Arc::new(clock.clone()),
            Arc::new(UlidGenerator::new(clock.clone())),
        )
        .with_store_retry(StoreRetry::none());
        Fixture {
            store,
            clock,
            client,
        }
    }

    #[tokio::test]
    async fn defaults_fill_unset_options() {
        let f = fixture();
        let info = f
            .client
            .enqueue("email:welcome", b"{}".to_vec(), EnqueueOptions::new())
            .await
            .unwrap();

        assert_eq!(info.queue, DEFAULT_QUEUE);
        assert_eq!(info.max_retry, 3);
        assert_eq!(info.timeout, Duration::from_secs(1800));
        assert_eq!(info.state, TaskState::Pending);
        assert_eq!(info.next_process_at, f.clock.now());
    }

    #[tokio::test]
    async fn process_in_schedules_relative_to_now() {
        let f = fixture();
        let info = f
            .client
            .enqueue(
                "email:send_later",
                b"{}".to_vec(),
                EnqueueOptions::new().process_in(Duration::from_secs(3)),
            )
            .await
            .unwrap();

        assert_eq!(info.state, TaskState::Scheduled);
        assert_eq!(info.next_process_at, f.clock.now() + TimeDelta::seconds(3));
    }

    #[tokio::test]
    async fn unbounded_delay_is_clamped() {
        let f = fixture();
        let info = f
            .client
            .enqueue(
                "email:send_later",
                b"{}".to_vec(),
                EnqueueOptions::new().process_in(Duration::MAX),
            )
            .await
            .unwrap();

        assert_eq!(info.state, TaskState::Scheduled);
        assert_eq!(info.next_process_at, chrono::DateTime::<Utc>::MAX_UTC);
        assert_eq!(f.store.counts().await.unwrap()[DEFAULT_QUEUE].scheduled, 1);
    }

    #[tokio::test]
    async fn typed_enqueue_encodes_json() {
        let f = fixture();
        let info = f
            .client
            .enqueue_task(&WelcomeEmail { user_id: 7 }, EnqueueOptions::new().queue("critical"))
            .await
            .unwrap();

        let record = f.store.get(info.task_id).await.unwrap().unwrap();
        assert_eq!(record.task_type.as_str(), "email:welcome");
        assert_eq!(record.payload, br#"{"user_id":7}"#.to_vec());
        assert_eq!(record.queue, "critical");
    }

    #[tokio::test]
    async fn validation_errors_write_nothing() {
        let f = fixture();
        let cases = [
            (
                f.client.enqueue(" ", Vec::new(), EnqueueOptions::new()).await,
                EnqueueError::InvalidTaskType,
            ),
            (
                f.client
                    .enqueue("t", Vec::new(), EnqueueOptions::new().queue("two words"))
                    .await,
                EnqueueError::InvalidQueue("two words".into()),
            ),
            (
                f.client
                    .enqueue(
                        "t",
                        Vec::new(),
                        EnqueueOptions::new()
                            .process_in(Duration::from_secs(1))
                            .process_at(f.clock.now()),
                    )
                    .await,
                EnqueueError::ConflictingSchedule,
            ),
        ];
        for (result, expected) in cases {
            assert_eq!(result.unwrap_err(), expected);
        }
        assert!(f.store.counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn caller_supplied_id_is_idempotent() {
        let f = fixture();
        let id = TaskId::from_ulid(Ulid::new());
        let opts = EnqueueOptions::new().task_id(id);

        let first = f.client.enqueue("t", Vec::new(), opts.clone()).await.unwrap();
        assert_eq!(first.task_id, id);

        let second = f.client.enqueue("t", b"other".to_vec(), opts).await;
        assert_eq!(second.unwrap_err(), EnqueueError::DuplicateId(id));

        let stored = f.store.get(id).await.unwrap().unwrap();
        assert!(stored.payload.is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_is_reported() {
        let f = fixture();
        f.store.set_available(false);
        let err = f
            .client
            .enqueue("t", Vec::new(), EnqueueOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::StoreUnavailable(_)));
    }
}
