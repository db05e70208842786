//! Handler trait - Task を実行する Handler の定義
//!
//! # 二層構造
//! - **Handler<T>**: 型付き。payload は decode 済みの `T` として渡される
//! - **DynHandler**: object-safe。`HashMap<String, Arc<dyn DynHandler>>` に格納する
//!
//! TypedHandler<T, H> が decode を一度だけ行って Handler<T> に渡します。
//! decode 失敗は HandlerError として扱われ、通常の retry/backoff に乗ります。

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::codec::PayloadCodec;
use super::task::Task;
use crate::domain::{HandlerError, TaskId, TaskRecord, TaskType};

/// Metadata about the attempt being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub queue: String,

    /// Failed attempts before this one.
    pub retry_count: u32,
    pub max_retry: u32,

    /// The attempt is cancelled at this instant.
    pub deadline: DateTime<Utc>,
}

impl TaskContext {
    pub fn for_record(record: &TaskRecord, now: DateTime<Utc>) -> Self {
        Self {
            task_id: record.id,
            task_type: record.task_type.clone(),
            queue: record.queue.clone(),
            retry_count: record.retry_count,
            max_retry: record.max_retry,
            deadline: record.lease_expires_at.unwrap_or(now),
        }
    }
}

/// Handler は decode 済みの Task を実行する
///
/// # 使用例
/// ```ignore
/// struct WelcomeEmailHandler;
///
/// #[async_trait]
/// impl Handler<WelcomeEmail> for WelcomeEmailHandler {
///     async fn handle(&self, ctx: &TaskContext, task: WelcomeEmail) -> Result<(), HandlerError> {
///         tracing::info!(user_id = task.user_id, "sending welcome email");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, task: T) -> Result<(), HandlerError>;
}

/// DynHandler は object-safe な Handler の抽象化
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, ctx: TaskContext, payload: Vec<u8>) -> Result<(), HandlerError>;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, ctx: TaskContext, payload: Vec<u8>) -> Result<(), HandlerError> {
        let task: T = PayloadCodec::decode(&payload)
            .map_err(|e| HandlerError::new(format!("{} payload: {e}", T::TYPE)))?;
        self.handler.handle(&ctx, task).await
    }
}

/// Closure handler over raw payload bytes.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> DynHandler for FnHandler<F>
where
    F: Fn(TaskContext, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle_dyn(&self, ctx: TaskContext, payload: Vec<u8>) -> Result<(), HandlerError> {
        (self.f)(ctx, payload).await
    }
}
