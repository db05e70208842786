//! WorkerPool - 重み付き dequeue ループと並行実行の上限
//!
//! # 構成
//! - dequeue ループは一本だけ。WeightedSelector の credit はこのループが専有する
//! - 実行枠は `Semaphore(concurrency)`。permit が取れるまで次の dequeue をしない
//! - 実行中の task は JoinSet で保持し、停止時に grace 期間だけ待つ
//!
//! # 停止
//! `stop(grace)` で新規 dequeue を止め、実行中の task を grace まで待ちます。
//! grace を過ぎた task は abort され、store 上は Active のまま残ります
//! （Reaper が lease 期限切れとして回収します）。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::ports::{Clock, TaskStore};
use crate::queue::{RetryPolicy, WeightedSelector};

use super::executor::Executor;

/// Pool sizing and lanes.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub concurrency: usize,

    /// Lanes in scan order with their weights.
    pub queues: Vec<(String, u32)>,

    /// Longest idle wait before polling the store again.
    pub poll_interval: Duration,
}

/// How the pool ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStopReport {
    /// Tasks still running when the grace period elapsed.
    pub abandoned: usize,
}

pub struct WorkerPool {
    /// `Some(grace)` once a stop was requested.
    stop_tx: watch::Sender<Option<Duration>>,
    join: JoinHandle<PoolStopReport>,
}

impl WorkerPool {
    pub fn start(
        config: PoolConfig,
        store: Arc<dyn TaskStore>,
        executor: Arc<Executor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(None);
        tracing::info!(
            concurrency = config.concurrency,
            queues = ?config.queues,
            "worker pool starting"
        );
        let join = tokio::spawn(dequeue_loop(config, store, executor, clock, stop_rx));
        Self { stop_tx, join }
    }

    /// Stop dequeuing and wait up to `grace` for in-flight tasks.
    pub async fn stop(self, grace: Duration) -> PoolStopReport {
        let _ = self.stop_tx.send(Some(grace));
        match self.join.await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(error = %err, "worker pool terminated abnormally");
                PoolStopReport::default()
            }
        }
    }
}

async fn dequeue_loop(
    config: PoolConfig,
    store: Arc<dyn TaskStore>,
    executor: Arc<Executor>,
    clock: Arc<dyn Clock>,
    mut stop_rx: watch::Receiver<Option<Duration>>,
) -> PoolStopReport {
    let slots = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut selector = WeightedSelector::new(config.queues.iter().cloned());
    let mut in_flight: JoinSet<()> = JoinSet::new();
    let store_backoff =
        RetryPolicy::exponential(config.poll_interval / 10, config.poll_interval * 5);
    let mut store_failures: u32 = 0;

    loop {
        if stop_rx.borrow().is_some() {
            break;
        }

        let permit = tokio::select! {
            _ = stop_rx.changed() => break,
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        // finished tasks only need their JoinSet slot freed
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(err) = joined {
                tracing::error!(error = %err, "worker task failed to join");
            }
        }

        match selector.next(&*store, clock.now()).await {
            Ok(Some(record)) => {
                store_failures = 0;
                let executor = Arc::clone(&executor);
                in_flight.spawn(async move {
                    let _permit = permit;
                    executor.run(record).await;
                });
            }
            Ok(None) => {
                store_failures = 0;
                drop(permit);
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = store.wait_for_work(config.poll_interval) => {}
                }
            }
            Err(err) => {
                drop(permit);
                let delay = store_backoff.backoff(store_failures);
                store_failures = store_failures.saturating_add(1);
                tracing::warn!(error = %err, ?delay, "dequeue failed");
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    let grace = (*stop_rx.borrow()).unwrap_or_default();
    drain(in_flight, grace).await
}

async fn drain(mut in_flight: JoinSet<()>, grace: Duration) -> PoolStopReport {
    let running = in_flight.len();
    tracing::info!(running, ?grace, "worker pool stopping");

    let finished = tokio::time::timeout(grace, async {
        while in_flight.join_next().await.is_some() {}
    })
    .await;

    let mut report = PoolStopReport::default();
    if finished.is_err() {
        report.abandoned = in_flight.len();
        tracing::warn!(
            abandoned = report.abandoned,
            "grace period elapsed, abandoning in-flight tasks"
        );
        in_flight.shutdown().await;
    }
    tracing::info!("worker pool stopped");
    report
}
