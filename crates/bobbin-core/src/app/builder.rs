//! EngineBuilder - Engine の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `expect_tasks()` で期待される task_type を宣言
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば `EngineError::MissingTaskTypes` を返す
//!
//! store / clock / id 生成器は差し替え可能で、省略時は
//! InMemoryTaskStore / SystemClock / UlidGenerator になります。

use std::future::Future;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::domain::{EngineError, HandlerError};
use crate::impls::InMemoryTaskStore;
use crate::ports::{Clock, IdGenerator, SystemClock, TaskStore, UlidGenerator};
use crate::typed::{Dispatcher, Handler, Task, TaskContext};

use super::client::{Client, TaskDefaults};
use super::engine::Engine;
use super::executor::Executor;
use super::reaper::Reaper;
use super::scheduler::{Scheduler, TaskTemplate};
use super::store_retry::StoreRetry;

/// Builds an [`Engine`].
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new(config)
///     .register::<WelcomeEmail, _>(WelcomeEmailHandler)
///     .cron("@every 1m", TaskTemplate::for_task(&HelloWorld)?)
///     .expect_tasks(&["email:welcome", "task:hello_world"])
///     .build()
///     .await?;
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    dispatcher: Dispatcher,
    expected_tasks: Vec<String>,
    cron: Vec<(String, TaskTemplate)>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            ids: None,
            dispatcher: Dispatcher::new(),
            expected_tasks: Vec::new(),
            cron: Vec::new(),
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(self, handler: H) -> Self {
        self.dispatcher.register::<T, H>(handler);
        self
    }

    pub fn register_fn<F, Fut>(self, task_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskContext, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.dispatcher.register_fn(task_type, f);
        self
    }

    /// Task types that must have a handler when `build()` runs.
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks
            .extend(task_types.iter().map(|t| t.to_string()));
        self
    }

    /// Recurring job registered with the scheduler during `build()`.
    pub fn cron(mut self, spec: impl Into<String>, template: TaskTemplate) -> Self {
        self.cron.push((spec.into(), template));
        self
    }

    pub async fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;

        let mut missing: Vec<String> = self
            .expected_tasks
            .iter()
            .filter(|t| !self.dispatcher.contains(t))
            .cloned()
            .collect();
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(EngineError::MissingTaskTypes(missing));
        }

        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let dispatcher = Arc::new(self.dispatcher);
        let store_retry = StoreRetry::new(config.store_retry_attempts);

        let client = Client::new(store.clone(), clock.clone(), ids.clone())
            .with_defaults(TaskDefaults {
                max_retry: config.max_retry,
                timeout: config.task_timeout(),
                retention: config.task_retention(),
                ..TaskDefaults::default()
            })
            .with_store_retry(store_retry.clone());
        let executor = Arc::new(Executor::new(
            store.clone(),
            dispatcher.clone(),
            clock.clone(),
            config.retry_policy(),
            store_retry,
        ));
        let reaper = Arc::new(Reaper::new(
            store.clone(),
            executor.clone(),
            clock.clone(),
            config.lease_margin(),
        ));
        let scheduler = Arc::new(Scheduler::new(client.clone(), clock.clone(), ids));
        for (spec, template) in self.cron {
            scheduler.register(&spec, template).await?;
        }

        Ok(Engine::new(
            config, store, clock, dispatcher, client, executor, reaper, scheduler,
        ))
    }
}
