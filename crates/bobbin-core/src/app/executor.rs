//! Executor - Active な task を一件実行して結果を store に反映する
//!
//! # フロー
//! 1. Dispatcher で handler を解決（無ければ NoHandler で即 Dead）
//! 2. handler を別 tokio task で実行し、timeout で囲む（panic は JoinError として回収）
//! 3. 成功 -> ack / 失敗 -> retry か kill

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::domain::{DeadReason, StoreError, TaskFailure, TaskRecord};
use crate::ports::{Clock, TaskStore};
use crate::queue::RetryPolicy;
use crate::typed::{Dispatcher, TaskContext};

use super::store_retry::StoreRetry;

/// What happened to a task after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Retried { delay: Duration },
    Dead(DeadReason),
    /// The store rejected the final transition; the lease reaper owns the task now.
    Unsettled,
}

/// Aborts the handler task when dropped, so cancelling the executor cancels the handler.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Executor {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    store_retry: StoreRetry,
}

impl Executor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        store_retry: StoreRetry,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            retry,
            store_retry,
        }
    }

    /// Execute one dequeued task and record its outcome.
    pub async fn run(&self, record: TaskRecord) -> Outcome {
        let span = tracing::info_span!(
            "task",
            task_id = %record.id,
            task_type = %record.task_type,
            queue = %record.queue,
            retry_count = record.retry_count,
        );
        async move {
            match self.execute(&record).await {
                Ok(()) => self.complete(&record).await,
                Err(failure) => self.fail(&record, failure).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, record: &TaskRecord) -> Result<(), TaskFailure> {
        let Some(handler) = self.dispatcher.resolve(record.task_type.as_str()) else {
            return Err(TaskFailure::NoHandler(record.task_type.to_string()));
        };

        let ctx = TaskContext::for_record(record, self.clock.now());
        let payload = record.payload.clone();
        let mut running = AbortOnDrop(tokio::spawn(
            async move { handler.handle_dyn(ctx, payload).await }.in_current_span(),
        ));

        match tokio::time::timeout(record.timeout, &mut running.0).await {
            Ok(Ok(result)) => result.map_err(TaskFailure::from),
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(TaskFailure::Panicked(panic_message(join_err.into_panic())))
            }
            Ok(Err(_)) => Err(TaskFailure::Panicked("handler task was cancelled".into())),
            Err(_) => Err(TaskFailure::Timeout(record.timeout)),
        }
    }

    async fn complete(&self, record: &TaskRecord) -> Outcome {
        let now = self.clock.now();
        match self
            .store_retry
            .run("ack", || self.store.ack(record.id, now))
            .await
        {
            Ok(()) => {
                tracing::info!("task completed");
                Outcome::Completed
            }
            Err(err) => unsettled("ack", err),
        }
    }

    /// Route a failed attempt to Retry or Dead.
    ///
    /// Also used by the lease reaper for tasks whose worker disappeared.
    pub async fn fail(&self, record: &TaskRecord, failure: TaskFailure) -> Outcome {
        let now = self.clock.now();
        let message = failure.to_string();

        if failure.skips_retry() || !record.can_retry() {
            let reason = DeadReason::for_failure(&failure);
            let result = self
                .store_retry
                .run("kill", || {
                    self.store.kill(record.id, reason, message.clone(), now)
                })
                .await;
            return match result {
                Ok(()) => {
                    if reason == DeadReason::NoHandler {
                        tracing::error!(
                            error = %message,
                            "no handler registered, task dead-lettered"
                        );
                    } else {
                        tracing::error!(%reason, error = %message, "task dead-lettered");
                    }
                    Outcome::Dead(reason)
                }
                Err(err) => unsettled("kill", err),
            };
        }

        let delay = self.retry.backoff(record.retry_count);
        let result = self
            .store_retry
            .run("retry", || {
                self.store.retry(record.id, delay, message.clone(), now)
            })
            .await;
        match result {
            Ok(info) => {
                tracing::warn!(
                    error = %message,
                    ?delay,
                    next_retry_count = info.retry_count,
                    "task failed, retry scheduled"
                );
                Outcome::Retried { delay }
            }
            Err(err) => unsettled("retry", err),
        }
    }
}

fn unsettled(op: &'static str, err: StoreError) -> Outcome {
    tracing::error!(op, error = %err, "could not record task outcome");
    Outcome::Unsettled
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
