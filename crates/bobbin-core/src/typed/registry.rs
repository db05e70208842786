//! Dispatcher - task_type から Handler を引く登録表
//!
//! - `HashMap<String, Arc<dyn DynHandler>>` で型消去された Handler を保持
//! - 再登録は前の Handler を置き換える（置き換えられた Handler を返す）
//! - worker は実行中に `resolve` するので、登録は RwLock 越しに行う

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use super::handler::{DynHandler, FnHandler, Handler, TaskContext, TypedHandler};
use super::task::Task;
use crate::domain::HandlerError;

/// Dispatcher は task_type ごとに Handler を一つだけ持つ
///
/// # 使用例
/// ```ignore
/// let dispatcher = Dispatcher::new();
/// dispatcher.register::<WelcomeEmail, _>(WelcomeEmailHandler);
/// dispatcher.register_fn("task:hello_world", |_ctx, _payload| async { Ok(()) });
///
/// let handler = dispatcher.resolve("email:welcome");
/// ```
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn DynHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler for `T::TYPE`.
    pub fn register<T: Task, H: Handler<T> + 'static>(
        &self,
        handler: H,
    ) -> Option<Arc<dyn DynHandler>> {
        self.register_dyn(T::TYPE, Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    /// Register a closure over the raw payload bytes.
    pub fn register_fn<F, Fut>(
        &self,
        task_type: impl Into<String>,
        f: F,
    ) -> Option<Arc<dyn DynHandler>>
    where
        F: Fn(TaskContext, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_dyn(task_type, Arc::new(FnHandler::new(f)))
    }

    /// Returns the handler that was replaced, if any.
    pub fn register_dyn(
        &self,
        task_type: impl Into<String>,
        handler: Arc<dyn DynHandler>,
    ) -> Option<Arc<dyn DynHandler>> {
        let task_type = task_type.into();
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_type.clone(), handler);
        if previous.is_some() {
            tracing::debug!(task_type = %task_type, "handler replaced");
        }
        previous
    }

    pub fn resolve(&self, task_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(task_type)
    }

    /// Sorted list of registered task types.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("task_types", &self.registered_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskType};
    use crate::typed::task::fixtures::{HelloWorld, WelcomeEmail};
    use async_trait::async_trait;
    use chrono::Utc;
    use ulid::Ulid;

    struct Accept;

    #[async_trait]
    impl Handler<WelcomeEmail> for Accept {
        async fn handle(
            &self,
            _ctx: &TaskContext,
            _task: WelcomeEmail,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    struct Reject;

    #[async_trait]
    impl Handler<WelcomeEmail> for Reject {
        async fn handle(
            &self,
            _ctx: &TaskContext,
            _task: WelcomeEmail,
        ) -> Result<(), HandlerError> {
            Err(HandlerError::permanent("rejected"))
        }
    }

    fn ctx(task_type: &str) -> TaskContext {
        TaskContext {
            task_id: TaskId::from_ulid(Ulid::new()),
            task_type: TaskType::new(task_type),
            queue: "default".into(),
            retry_count: 0,
            max_retry: 0,
            deadline: Utc::now(),
        }
    }

    #[test]
    fn register_then_resolve() {
        let dispatcher = Dispatcher::new();
        assert!(dispatcher.register::<WelcomeEmail, _>(Accept).is_none());

        assert!(dispatcher.resolve(WelcomeEmail::TYPE).is_some());
        assert!(dispatcher.resolve(HelloWorld::TYPE).is_none());
        assert!(dispatcher.contains(WelcomeEmail::TYPE));
    }

    #[tokio::test]
    async fn later_registration_replaces_earlier() {
        let dispatcher = Dispatcher::new();
        dispatcher.register::<WelcomeEmail, _>(Accept);
        let previous = dispatcher.register::<WelcomeEmail, _>(Reject);
        assert!(previous.is_some());

        let handler = dispatcher.resolve(WelcomeEmail::TYPE).unwrap();
        let err = handler
            .handle_dyn(ctx(WelcomeEmail::TYPE), br#"{"user_id":1}"#.to_vec())
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(dispatcher.registered_types().len(), 1);
    }

    #[test]
    fn registered_types_are_sorted() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_fn(HelloWorld::TYPE, |_ctx, _payload| async { Ok(()) });
        dispatcher.register::<WelcomeEmail, _>(Accept);

        assert_eq!(
            dispatcher.registered_types(),
            vec![WelcomeEmail::TYPE.to_string(), HelloWorld::TYPE.to_string()]
        );
    }
}
