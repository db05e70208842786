//! Errors - エラー型と分類
//!
//! 境界ごとにエラー型を分けています。
//! - **StoreError**: TaskStore（外部の永続ストア）との境界
//! - **EnqueueError**: Producer の同期エラー（validation / store availability）
//! - **HandlerError / TaskFailure**: 実行時の失敗。retry/backoff の判断材料になり、
//!   呼び出し元には task state としてのみ見える
//! - **CronError / EngineError**: 起動時の設定ミス

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskState;

/// Errors reported by a `TaskStore` implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Transient infrastructure failure; callers retry with backoff.
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate task id {0}")]
    DuplicateId(TaskId),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {id} cannot {op} from state {state}")]
    InvalidTransition {
        id: TaskId,
        state: TaskState,
        op: &'static str,
    },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Errors surfaced synchronously at the Producer boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("task type must not be empty")]
    InvalidTaskType,

    #[error("invalid queue name '{0}'")]
    InvalidQueue(String),

    #[error("process_in and process_at are mutually exclusive")]
    ConflictingSchedule,

    #[error("payload encoding failed: {0}")]
    PayloadEncoding(String),

    /// The caller-supplied id already exists; nothing was written.
    #[error("duplicate task id {0}")]
    DuplicateId(TaskId),

    #[error("task store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for EnqueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateId(id) => EnqueueError::DuplicateId(id),
            StoreError::Unavailable(msg) => EnqueueError::StoreUnavailable(msg),
            other => EnqueueError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Business-logic failure returned by a handler.
///
/// A permanent error skips the remaining retry budget and dead-letters the
/// task right away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    permanent: bool,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }
}

/// Why a single execution attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("no handler registered for task type '{0}'")]
    NoHandler(String),

    #[error("lease expired while active")]
    LeaseExpired,
}

impl TaskFailure {
    /// Failures that go to `Dead` regardless of the retry budget.
    pub fn skips_retry(&self) -> bool {
        match self {
            TaskFailure::NoHandler(_) => true,
            TaskFailure::Handler(err) => err.is_permanent(),
            _ => false,
        }
    }
}

/// Reason recorded on a dead-lettered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadReason {
    NoHandler,
    Exhausted,
    Permanent,
    LeaseExpired,
}

impl DeadReason {
    /// Classify a failure that ended a task.
    pub fn for_failure(failure: &TaskFailure) -> Self {
        match failure {
            TaskFailure::NoHandler(_) => DeadReason::NoHandler,
            TaskFailure::Handler(err) if err.is_permanent() => DeadReason::Permanent,
            TaskFailure::LeaseExpired => DeadReason::LeaseExpired,
            _ => DeadReason::Exhausted,
        }
    }
}

impl fmt::Display for DeadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeadReason::NoHandler => "no_handler",
            DeadReason::Exhausted => "exhausted",
            DeadReason::Permanent => "permanent",
            DeadReason::LeaseExpired => "lease_expired",
        };
        f.write_str(s)
    }
}

/// Invalid cron registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("invalid cron spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("invalid cron template: {0}")]
    InvalidTemplate(String),
}

/// Errors from building or driving the engine lifecycle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Cron(#[from] CronError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn store_errors_map_to_enqueue_errors() {
        let id = TaskId::from_ulid(ulid::Ulid::new());
        assert_eq!(
            EnqueueError::from(StoreError::DuplicateId(id)),
            EnqueueError::DuplicateId(id)
        );
        assert_eq!(
            EnqueueError::from(StoreError::Unavailable("down".into())),
            EnqueueError::StoreUnavailable("down".into())
        );
    }

    #[rstest]
    #[case::handler(TaskFailure::Handler(HandlerError::new("x")), false, DeadReason::Exhausted)]
    #[case::permanent(
        TaskFailure::Handler(HandlerError::permanent("x")),
        true,
        DeadReason::Permanent
    )]
    #[case::timeout(TaskFailure::Timeout(Duration::from_secs(1)), false, DeadReason::Exhausted)]
    #[case::panic(TaskFailure::Panicked("boom".into()), false, DeadReason::Exhausted)]
    #[case::no_handler(TaskFailure::NoHandler("t".into()), true, DeadReason::NoHandler)]
    #[case::lease(TaskFailure::LeaseExpired, false, DeadReason::LeaseExpired)]
    fn failure_classification(
        #[case] failure: TaskFailure,
        #[case] skips: bool,
        #[case] reason: DeadReason,
    ) {
        assert_eq!(failure.skips_retry(), skips);
        assert_eq!(DeadReason::for_failure(&failure), reason);
    }
}
