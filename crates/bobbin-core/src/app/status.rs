//! Status - 運用者向けのスナップショット
//!
//! queue ごとの state 別件数、登録済み handler、cron entry の次回実行時刻をまとめます。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{CronEntryId, TaskId};
use crate::ports::QueueCounts;

use super::scheduler::CronEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CronEntryStatus {
    pub id: CronEntryId,
    pub spec: String,
    pub task_type: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_task_id: Option<TaskId>,
}

impl From<&CronEntry> for CronEntryStatus {
    fn from(entry: &CronEntry) -> Self {
        Self {
            id: entry.id,
            spec: entry.spec.clone(),
            task_type: entry.template.task_type.to_string(),
            next_run: entry.next_run,
            last_run: entry.last_run,
            last_task_id: entry.last_task_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub pool_running: bool,
    pub scheduler_running: bool,
    pub task_types: Vec<String>,
    pub queues: BTreeMap<String, QueueCounts>,
    pub cron_entries: Vec<CronEntryStatus>,
}

impl EngineStatus {
    /// Tasks waiting or running across all queues.
    pub fn backlog(&self) -> usize {
        self.queues
            .values()
            .map(|c| c.scheduled + c.pending + c.active + c.retry)
            .sum()
    }

    pub fn dead(&self) -> usize {
        self.queues.values().map(|c| c.dead).sum()
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pool={} scheduler={} handlers=[{}]",
            if self.pool_running { "running" } else { "stopped" },
            if self.scheduler_running { "running" } else { "stopped" },
            self.task_types.join(", ")
        )?;
        for (queue, c) in &self.queues {
            writeln!(
                f,
                "  {queue}: scheduled={} pending={} active={} retry={} completed={} dead={}",
                c.scheduled, c.pending, c.active, c.retry, c.completed, c.dead
            )?;
        }
        for entry in &self.cron_entries {
            let next = entry
                .next_run
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            writeln!(f, "  cron {} '{}' -> {} next={next}", entry.id, entry.spec, entry.task_type)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_excludes_terminal_states() {
        let status = EngineStatus {
            pool_running: true,
            scheduler_running: false,
            task_types: vec!["email:welcome".into()],
            queues: BTreeMap::from([
                (
                    "critical".to_string(),
                    QueueCounts {
                        pending: 2,
                        retry: 1,
                        dead: 4,
                        completed: 9,
                        ..QueueCounts::default()
                    },
                ),
                (
                    "low".to_string(),
                    QueueCounts {
                        scheduled: 3,
                        ..QueueCounts::default()
                    },
                ),
            ]),
            cron_entries: Vec::new(),
        };

        assert_eq!(status.backlog(), 6);
        assert_eq!(status.dead(), 4);
        let rendered = status.to_string();
        assert!(rendered.starts_with("pool=running scheduler=stopped handlers=[email:welcome]"));
        assert!(rendered.contains("critical: scheduled=0 pending=2"));
    }
}
