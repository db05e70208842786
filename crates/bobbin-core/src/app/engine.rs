//! Engine - ライフサイクルの調停
//!
//! 起動順: store -> dispatcher 登録 -> worker pool -> scheduler
//! 停止順: scheduler（cron からの新規 enqueue を止める）-> worker pool（grace 付き）
//!
//! グローバルな client/server は持たず、Engine を一度だけ組み立てて参照を配ります。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::{ConfigError, EngineConfig};
use crate::domain::{CronEntryId, CronError, EngineError, StoreError, TaskId, TaskRecord};
use crate::ports::{Clock, QueueCounts, TaskStore};
use crate::typed::Dispatcher;

use super::background::LoopHandle;
use super::client::Client;
use super::executor::Executor;
use super::reaper::Reaper;
use super::scheduler::{Scheduler, TaskTemplate};
use super::status::{CronEntryStatus, EngineStatus};
use super::worker_pool::{PoolConfig, PoolStopReport, WorkerPool};

/// Pool and its companion loops.
struct PoolRuntime {
    pool: WorkerPool,
    forwarder: LoopHandle,
    reaper: LoopHandle,
}

#[derive(Default)]
struct Running {
    pool: Option<PoolRuntime>,
    scheduler: Option<LoopHandle>,
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<Dispatcher>,
    client: Client,
    executor: Arc<Executor>,
    reaper: Arc<Reaper>,
    scheduler: Arc<Scheduler>,
    running: Mutex<Running>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: EngineConfig,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<Dispatcher>,
        client: Client,
        executor: Arc<Executor>,
        reaper: Arc<Reaper>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            dispatcher,
            client,
            executor,
            reaper,
            scheduler,
            running: Mutex::new(Running::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Producer handle for HTTP handlers and other callers.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub async fn register_cron(
        &self,
        spec: &str,
        template: TaskTemplate,
    ) -> Result<CronEntryId, CronError> {
        self.scheduler.register(spec, template).await
    }

    /// Start the pool with the configured lanes, then the scheduler.
    ///
    /// Does nothing when the configuration disables the engine.
    pub async fn start(&self) -> Result<(), EngineError> {
        if !self.config.enabled {
            tracing::info!("task engine disabled by configuration");
            return Ok(());
        }
        self.start_pool(self.config.concurrency, self.config.queue_weights())
            .await?;
        self.start_scheduler().await
    }

    /// Stop the scheduler, then the pool with the configured grace period.
    pub async fn shutdown(&self) -> Option<PoolStopReport> {
        self.stop_scheduler().await;
        self.stop_pool(self.config.shutdown_grace()).await
    }

    pub async fn start_pool(
        &self,
        concurrency: usize,
        queues: Vec<(String, u32)>,
    ) -> Result<(), EngineError> {
        if concurrency == 0 || queues.is_empty() || queues.iter().any(|(_, w)| *w == 0) {
            return Err(ConfigError::Invalid(
                "pool needs a positive concurrency and at least one weighted queue".into(),
            )
            .into());
        }

        let mut running = self.running.lock().await;
        if running.pool.is_some() {
            return Err(EngineError::AlreadyRunning("worker pool"));
        }

        // reclaim tasks abandoned by a previous process before taking new ones
        self.reaper.sweep().await;

        let forwarder = {
            let store = self.store.clone();
            let clock = self.clock.clone();
            LoopHandle::spawn("forwarder", self.config.forward_interval(), move || {
                let (store, clock) = (store.clone(), clock.clone());
                async move {
                    match store.promote_scheduled(clock.now()).await {
                        Ok(0) => {}
                        Ok(moved) => tracing::debug!(moved, "promoted scheduled tasks"),
                        Err(err) => tracing::warn!(error = %err, "promotion failed"),
                    }
                }
            })
        };
        let reaper = {
            let reaper = self.reaper.clone();
            LoopHandle::spawn("reaper", self.config.reaper_interval(), move || {
                let reaper = reaper.clone();
                async move {
                    reaper.sweep().await;
                }
            })
        };
        let pool = WorkerPool::start(
            PoolConfig {
                concurrency,
                queues,
                poll_interval: self.config.poll_interval(),
            },
            self.store.clone(),
            self.executor.clone(),
            self.clock.clone(),
        );

        running.pool = Some(PoolRuntime {
            pool,
            forwarder,
            reaper,
        });
        Ok(())
    }

    /// Returns `None` when the pool was not running.
    pub async fn stop_pool(&self, grace: Duration) -> Option<PoolStopReport> {
        let runtime = self.running.lock().await.pool.take()?;
        let report = runtime.pool.stop(grace).await;
        runtime.forwarder.stop().await;
        runtime.reaper.stop().await;
        Some(report)
    }

    pub async fn start_scheduler(&self) -> Result<(), EngineError> {
        let mut running = self.running.lock().await;
        if running.scheduler.is_some() {
            return Err(EngineError::AlreadyRunning("scheduler"));
        }
        let scheduler = self.scheduler.clone();
        running.scheduler = Some(LoopHandle::spawn(
            "scheduler",
            self.config.cron_tick(),
            move || {
                let scheduler = scheduler.clone();
                async move {
                    scheduler.tick().await;
                }
            },
        ));
        tracing::info!("scheduler started");
        Ok(())
    }

    pub async fn stop_scheduler(&self) {
        let handle = self.running.lock().await.scheduler.take();
        if let Some(handle) = handle {
            handle.stop().await;
            tracing::info!("scheduler stopped");
        }
    }

    /// Per-queue, per-state task counts.
    pub async fn counts(&self) -> Result<BTreeMap<String, QueueCounts>, StoreError> {
        self.store.counts().await
    }

    pub async fn task(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.store.get(id).await
    }

    pub async fn status(&self) -> Result<EngineStatus, StoreError> {
        let (pool_running, scheduler_running) = {
            let running = self.running.lock().await;
            (running.pool.is_some(), running.scheduler.is_some())
        };
        Ok(EngineStatus {
            pool_running,
            scheduler_running,
            task_types: self.dispatcher.registered_types(),
            queues: self.store.counts().await?,
            cron_entries: self
                .scheduler
                .entries()
                .await
                .iter()
                .map(CronEntryStatus::from)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EngineBuilder;
    use crate::domain::{EnqueueOptions, TaskState};

    fn config() -> EngineConfig {
        EngineConfig {
            concurrency: 2,
            poll_interval_ms: 10,
            forward_interval_ms: 10,
            cron_tick_ms: 10,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let engine = EngineBuilder::new(config()).build().await.unwrap();
        engine.start().await.unwrap();

        assert!(matches!(
            engine.start_pool(1, vec![("default".into(), 1)]).await,
            Err(EngineError::AlreadyRunning("worker pool"))
        ));
        assert!(matches!(
            engine.start_scheduler().await,
            Err(EngineError::AlreadyRunning("scheduler"))
        ));
        assert!(engine.shutdown().await.is_some());
        assert!(engine.shutdown().await.is_none());
    }

    #[tokio::test]
    async fn disabled_engine_does_not_start() {
        let engine = EngineBuilder::new(EngineConfig {
            enabled: false,
            ..config()
        })
        .build()
        .await
        .unwrap();
        engine.start().await.unwrap();

        let status = engine.status().await.unwrap();
        assert!(!status.pool_running);
        assert!(!status.scheduler_running);
    }

    #[tokio::test]
    async fn runs_enqueued_work_end_to_end() {
        let engine = EngineBuilder::new(config())
            .register_fn("email:welcome", |_ctx, _payload| async { Ok(()) })
            .build()
            .await
            .unwrap();
        engine.start().await.unwrap();

        let info = engine
            .client()
            .enqueue("email:welcome", b"{}".to_vec(), EnqueueOptions::new())
            .await
            .unwrap();

        let mut state = TaskState::Pending;
        for _ in 0..200 {
            state = engine.task(info.task_id).await.unwrap().unwrap().state;
            if state == TaskState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, TaskState::Completed);

        let status = engine.status().await.unwrap();
        assert!(status.pool_running);
        assert_eq!(status.task_types, vec!["email:welcome".to_string()]);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn rejects_unusable_pool_settings() {
        let engine = EngineBuilder::new(config()).build().await.unwrap();
        assert!(matches!(
            engine.start_pool(0, vec![("default".into(), 1)]).await,
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            engine.start_pool(1, Vec::new()).await,
            Err(EngineError::Config(_))
        ));
    }
}
