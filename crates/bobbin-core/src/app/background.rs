//! Periodic background loops (forwarder, reaper, cron tick).
//!
//! - `stop()` は watch で停止を通知し、実行中の tick が終わるのを待つ
//! - tick の途中では止めない（store への書き込みを中途半端にしない）

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to one spawned loop.
pub struct LoopHandle {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// Run `tick` every `period` until stopped. The first tick fires immediately.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(loop_name = name, ?period, "loop started");

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {}
                }
                if *stop_rx.borrow() {
                    break;
                }
                tick().await;
            }
            tracing::debug!(loop_name = name, "loop stopped");
        });

        Self {
            name,
            stop_tx,
            join,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the loop and wait for the current tick to finish.
    pub async fn stop(self) {
        // receiver may already be gone if the loop panicked
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.join.await {
            tracing::error!(loop_name = self.name, error = %err, "loop terminated abnormally");
        }
    }
}
