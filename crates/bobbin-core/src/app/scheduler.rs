//! Scheduler - cron entry を保持し、時刻が来たら Client 経由で enqueue する
//!
//! # 方針
//! - Scheduler の責務は durable な enqueue まで。実行は WorkerPool に任せる
//! - 取りこぼした発火は backfill しない（`next_run` は常に「今」から計算する）
//! - spec + template が同じ登録は冪等（既存の entry id を返す）

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::record::add_duration;
use crate::domain::{CronEntryId, CronError, EnqueueOptions, TaskId, TaskType};
use crate::ports::{Clock, IdGenerator};
use crate::typed::{PayloadCodec, Task};

use super::client::Client;

/// Parsed recurrence expression.
#[derive(Clone)]
pub enum CronSpec {
    /// `@every 1m30s`
    Every(Duration),
    /// 5-field, 6/7-field (with seconds) or `@daily` style descriptors.
    Cron {
        expr: String,
        schedule: Box<cron::Schedule>,
    },
}

impl CronSpec {
    pub fn parse(spec: &str) -> Result<Self, CronError> {
        let trimmed = spec.trim();
        let invalid = |reason: String| CronError::InvalidSpec {
            spec: spec.to_string(),
            reason,
        };

        if let Some(rest) = trimmed.strip_prefix("@every") {
            let every = parse_duration(rest.trim()).map_err(invalid)?;
            return Ok(CronSpec::Every(every));
        }

        let expr = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        };
        let schedule = cron::Schedule::from_str(&expr).map_err(|e| invalid(e.to_string()))?;
        Ok(CronSpec::Cron {
            expr,
            schedule: Box::new(schedule),
        })
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            CronSpec::Every(every) => Some(add_duration(after, *every)),
            CronSpec::Cron { schedule, .. } => schedule.after(&after).next(),
        }
    }

    /// Occurrence that follows `due` and lies after `now`.
    ///
    /// Keeps the cadence anchored at `due`; occurrences missed before `now`
    /// are skipped, not replayed.
    pub fn next_following(
        &self,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            CronSpec::Every(every) => {
                let behind = now.signed_duration_since(due).to_std().unwrap_or_default();
                let step = every.as_nanos().max(1);
                let steps = behind.as_nanos() / step + 1;
                let offset = steps
                    .checked_mul(step)
                    .and_then(|nanos| u64::try_from(nanos).ok())
                    .map_or(Duration::MAX, Duration::from_nanos);
                Some(add_duration(due, offset))
            }
            CronSpec::Cron { schedule, .. } => schedule.after(&now).next(),
        }
    }
}

impl fmt::Debug for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CronSpec::Every(every) => write!(f, "Every({every:?})"),
            CronSpec::Cron { expr, .. } => write!(f, "Cron({expr})"),
        }
    }
}

/// `1h30m`, `30s`, `500ms`, `2d`.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    if raw.is_empty() {
        return Err("missing duration".into());
    }
    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("expected a number in '{raw}'"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("bad number in '{raw}': {e}"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let secs_per_unit = match &rest[..unit_len] {
            "ms" => None,
            "s" => Some(1),
            "m" => Some(60),
            "h" => Some(60 * 60),
            "d" => Some(24 * 60 * 60),
            other => return Err(format!("unknown unit '{other}' in '{raw}'")),
        };
        let unit = match secs_per_unit {
            None => Some(Duration::from_millis(value)),
            Some(n) => value.checked_mul(n).map(Duration::from_secs),
        };
        total = unit
            .and_then(|u| total.checked_add(u))
            .ok_or_else(|| format!("interval '{raw}' is too large"))?;
        rest = &rest[unit_len..];
    }
    if total.is_zero() {
        return Err("interval must be positive".into());
    }
    Ok(total)
}

/// The task a cron entry enqueues on every fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTemplate {
    pub task_type: TaskType,
    pub payload: Vec<u8>,

    /// Queue, retry and timeout policy. Scheduling fields are not allowed.
    pub options: EnqueueOptions,
}

impl TaskTemplate {
    pub fn new(task_type: impl Into<TaskType>, payload: Vec<u8>) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            options: EnqueueOptions::default(),
        }
    }

    pub fn for_task<T: Task>(task: &T) -> Result<Self, CronError> {
        let payload =
            PayloadCodec::encode(task).map_err(|e| CronError::InvalidTemplate(e.to_string()))?;
        Ok(Self::new(T::TYPE, payload))
    }

    pub fn options(mut self, options: EnqueueOptions) -> Self {
        self.options = options;
        self
    }

    fn validate(&self) -> Result<(), CronError> {
        if !self.task_type.is_valid() {
            return Err(CronError::InvalidTemplate("task type must not be empty".into()));
        }
        let o = &self.options;
        if o.process_in.is_some() || o.process_at.is_some() || o.task_id.is_some() {
            return Err(CronError::InvalidTemplate(
                "templates cannot carry process_in, process_at or task_id".into(),
            ));
        }
        Ok(())
    }
}

/// A registered recurring job.
#[derive(Debug, Clone)]
pub struct CronEntry {
    pub id: CronEntryId,
    pub spec: String,
    pub schedule: CronSpec,
    pub template: TaskTemplate,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_task_id: Option<TaskId>,
}

pub struct Scheduler {
    client: Client,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    entries: Mutex<Vec<CronEntry>>,
}

impl Scheduler {
    pub fn new(client: Client, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            client,
            clock,
            ids,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a recurring job. Registering the same spec and template again
    /// returns the existing entry id.
    pub async fn register(
        &self,
        spec: &str,
        template: TaskTemplate,
    ) -> Result<CronEntryId, CronError> {
        template.validate()?;
        let schedule = CronSpec::parse(spec)?;
        let spec = spec.trim().to_string();

        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries
            .iter()
            .find(|e| e.spec == spec && e.template == template)
        {
            return Ok(existing.id);
        }

        let now = self.clock.now();
        let entry = CronEntry {
            id: self.ids.generate_cron_entry_id(),
            next_run: schedule.next_after(now),
            spec,
            schedule,
            template,
            last_run: None,
            last_task_id: None,
        };
        tracing::info!(
            entry_id = %entry.id,
            spec = %entry.spec,
            task_type = %entry.template.task_type,
            next_run = ?entry.next_run,
            "cron entry registered"
        );
        let id = entry.id;
        entries.push(entry);
        Ok(id)
    }

    /// Fire every entry whose `next_run` has passed. Returns the number of tasks enqueued.
    ///
    /// An entry fires at most once per tick however many occurrences were
    /// missed; its next run is computed forward from `now`.
    pub async fn tick(&self) -> usize {
        let now = self.clock.now();
        let mut fired = 0;
        let mut entries = self.entries.lock().await;

        for entry in entries.iter_mut() {
            let Some(due) = entry.next_run.filter(|at| *at <= now) else {
                continue;
            };
            let template = &entry.template;
            match self
                .client
                .enqueue(
                    template.task_type.clone(),
                    template.payload.clone(),
                    template.options.clone(),
                )
                .await
            {
                Ok(info) => {
                    fired += 1;
                    entry.last_task_id = Some(info.task_id);
                    tracing::info!(
                        entry_id = %entry.id,
                        task_id = %info.task_id,
                        task_type = %info.task_type,
                        queue = %info.queue,
                        "cron entry fired"
                    );
                }
                Err(err) => {
                    tracing::error!(entry_id = %entry.id, error = %err, "cron enqueue failed");
                }
            }
            entry.last_run = Some(now);
            entry.next_run = entry.schedule.next_following(due, now);
        }
        fired
    }

    pub async fn entries(&self) -> Vec<CronEntry> {
        self.entries.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{FixedClock, TaskStore, UlidGenerator};
    use crate::typed::task::fixtures::HelloWorld;
    use chrono::{TimeDelta, TimeZone};
    use rstest::rstest;

    #[rstest]
    #[case("1m", Duration::from_secs(60))]
    #[case("30s", Duration::from_secs(30))]
    #[case("1h30m", Duration::from_secs(90 * 60))]
    #[case("250ms", Duration::from_millis(250))]
    fn every_durations(#[case] raw: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(raw), Ok(expected));
    }

    #[rstest]
    #[case("@every")]
    #[case("@every 0s")]
    #[case("@every 5x")]
    #[case("not a cron")]
    #[case("61 * * * *")]
    fn invalid_specs(#[case] spec: &str) {
        assert!(matches!(
            CronSpec::parse(spec),
            Err(CronError::InvalidSpec { .. })
        ));
    }

    #[rstest]
    #[case("*/5 * * * *", 5)]
    #[case("0 */10 * * * *", 10)]
    #[case("@hourly", 60)]
    fn cron_expressions_advance(#[case] spec: &str, #[case] minutes: i64) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let schedule = CronSpec::parse(spec).unwrap();
        let first = schedule.next_after(start).unwrap();
        let second = schedule.next_after(first).unwrap();
        assert_eq!(second - first, TimeDelta::minutes(minutes));
    }

    struct Fixture {
        store: Arc<InMemoryTaskStore>,
        clock: FixedClock,
        scheduler: Scheduler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryTaskStore::new());
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        let client = Client::new(store.clone(), Arc::new(clock.clone()), ids.clone());
        let scheduler = Scheduler::new(client, Arc::new(clock.clone()), ids);
        Fixture {
            store,
            clock,
            scheduler,
        }
    }

    #[tokio::test]
    async fn identical_registration_is_idempotent() {
        let f = fixture();
        let template = TaskTemplate::for_task(&HelloWorld).unwrap();
        let a = f.scheduler.register("@every 1m", template.clone()).await.unwrap();
        let b = f.scheduler.register(" @every 1m ", template.clone()).await.unwrap();
        let c = f
            .scheduler
            .register("@every 1m", template.options(EnqueueOptions::new().queue("low")))
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(f.scheduler.entries().await.len(), 2);
    }

    #[tokio::test]
    async fn templates_cannot_schedule_themselves() {
        let f = fixture();
        let template = TaskTemplate::new("t", Vec::new())
            .options(EnqueueOptions::new().process_in(Duration::from_secs(1)));
        assert!(matches!(
            f.scheduler.register("@every 1m", template).await,
            Err(CronError::InvalidTemplate(_))
        ));
    }

    #[tokio::test]
    async fn fires_only_when_due() {
        let f = fixture();
        let template = TaskTemplate::new("task:hello_world", Vec::new());
        f.scheduler.register("@every 1m", template).await.unwrap();

        f.clock.advance(Duration::from_secs(59));
        assert_eq!(f.scheduler.tick().await, 0);

        f.clock.advance(Duration::from_secs(1));
        assert_eq!(f.scheduler.tick().await, 1);
        assert_eq!(f.scheduler.tick().await, 0);

        let counts = f.store.counts().await.unwrap();
        assert_eq!(counts["default"].pending, 1);
    }

    /// Downtime skips occurrences instead of queueing them.
    #[tokio::test]
    async fn missed_occurrences_are_not_backfilled() {
        let f = fixture();
        let template = TaskTemplate::new("task:hello_world", Vec::new());
        f.scheduler.register("@every 1m", template).await.unwrap();

        let start = f.clock.now();
        f.clock.advance(Duration::from_secs(10 * 60 + 5));
        assert_eq!(f.scheduler.tick().await, 1);

        let entry = &f.scheduler.entries().await[0];
        assert_eq!(entry.next_run, Some(start + TimeDelta::minutes(11)));
    }

    /// A tick that does not divide the interval must not shift the cadence.
    #[tokio::test]
    async fn cadence_does_not_drift_with_coarse_ticks() {
        let f = fixture();
        let start = f.clock.now();
        let template = TaskTemplate::new("task:hello_world", Vec::new());
        f.scheduler.register("@every 1m", template).await.unwrap();

        let mut fired = 0;
        for _ in 0..26 {
            f.clock.advance(Duration::from_secs(7));
            fired += f.scheduler.tick().await;
        }
        assert_eq!(f.clock.now(), start + TimeDelta::seconds(182));
        assert_eq!(fired, 3);

        let entry = &f.scheduler.entries().await[0];
        assert_eq!(entry.next_run, Some(start + TimeDelta::minutes(4)));
    }

    #[rstest]
    #[case("@every 1m", 65, 120)]
    #[case("@every 1m", 60, 120)]
    #[case("@every 30s", 0, 30)]
    #[case("*/5 * * * *", 7 * 60, 10 * 60)]
    fn next_following_skips_past_now(
        #[case] spec: &str,
        #[case] now_secs: i64,
        #[case] next_secs: i64,
    ) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let spec = CronSpec::parse(spec).unwrap();
        let due = spec.next_after(start - TimeDelta::seconds(1)).unwrap();
        let due = if matches!(spec, CronSpec::Every(_)) { start } else { due };
        let next = spec.next_following(due, start + TimeDelta::seconds(now_secs));
        assert_eq!(next, Some(start + TimeDelta::seconds(next_secs)));
    }

    #[rstest]
    #[case("99999999999999999999d")]
    #[case("999999999999999999d")]
    fn oversized_intervals_are_rejected(#[case] raw: &str) {
        assert!(parse_duration(raw).is_err());
    }
}
