//! Reaper - Lease 期限切れの回収と completed の掃除
//!
//! # フロー
//! 1. `expired_leases(now - lease_margin)` で worker が消えた Active task を取得
//! 2. 通常の失敗として扱う（retry budget が残っていれば Retry、無ければ Dead）
//! 3. retention を過ぎた Completed task を削除
//!
//! pool 起動時に一度、その後は定期的に実行されます。

use std::sync::Arc;
use std::time::Duration;

use crate::domain::TaskFailure;
use crate::domain::record::sub_duration;
use crate::ports::{Clock, TaskStore};

use super::executor::{Executor, Outcome};

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub requeued: usize,
    pub killed: usize,
    pub purged: usize,
}

pub struct Reaper {
    store: Arc<dyn TaskStore>,
    executor: Arc<Executor>,
    clock: Arc<dyn Clock>,
    lease_margin: Duration,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn TaskStore>,
        executor: Arc<Executor>,
        clock: Arc<dyn Clock>,
        lease_margin: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            clock,
            lease_margin,
        }
    }

    pub async fn sweep(&self) -> ReapReport {
        let mut report = ReapReport::default();
        let now = self.clock.now();
        let cutoff = sub_duration(now, self.lease_margin);

        match self.store.expired_leases(cutoff).await {
            Ok(expired) => {
                for record in expired {
                    tracing::warn!(
                        task_id = %record.id,
                        task_type = %record.task_type,
                        queue = %record.queue,
                        retry_count = record.retry_count,
                        lease_expires_at = ?record.lease_expires_at,
                        "reclaiming task with expired lease"
                    );
                    match self.executor.fail(&record, TaskFailure::LeaseExpired).await {
                        Outcome::Retried { .. } => report.requeued += 1,
                        Outcome::Dead(_) => report.killed += 1,
                        Outcome::Completed | Outcome::Unsettled => {}
                    }
                }
            }
            Err(err) => tracing::warn!(error = %err, "lease sweep failed"),
        }

        match self.store.purge_completed(now).await {
            Ok(purged) => report.purged = purged,
            Err(err) => tracing::warn!(error = %err, "retention purge failed"),
        }

        if report != ReapReport::default() {
            tracing::info!(
                requeued = report.requeued,
                killed = report.killed,
                purged = report.purged,
                "reaper sweep"
            );
        }
        report
    }
}
