//! Weighted lane selection (credit counters).
//!
//! Each queue starts a cycle with `credit = weight`. Queues are scanned in a
//! fixed order; the first queue with pending work and positive credit is served
//! and loses one credit. When every queue that still has work is out of credit,
//! all credits are reset and the scan restarts.
//!
//! Within one cycle a queue is drawn from at most `weight` times, and any queue
//! with pending work is drawn from at least once, so low weights never starve.

use chrono::{DateTime, Utc};

use crate::domain::{StoreError, TaskRecord};
use crate::ports::TaskStore;

#[derive(Debug, Clone)]
struct Lane {
    name: String,
    weight: u32,
    credit: u32,
}

/// Credit counters for the dequeue loop.
///
/// Owned by a single dequeue loop, so it needs no synchronization.
#[derive(Debug, Clone)]
pub struct WeightedSelector {
    lanes: Vec<Lane>,
}

impl WeightedSelector {
    /// Lanes are scanned in the order given. Zero weights are raised to 1.
    pub fn new<I, S>(weights: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let lanes = weights
            .into_iter()
            .map(|(name, weight)| {
                let weight = weight.max(1);
                Lane {
                    name: name.into(),
                    weight,
                    credit: weight,
                }
            })
            .collect();
        Self { lanes }
    }

    /// All lane names in scan order.
    pub fn queue_names(&self) -> Vec<String> {
        self.lanes.iter().map(|l| l.name.clone()).collect()
    }

    /// Lanes that still have credit in this cycle, in scan order.
    pub fn candidates(&self) -> Vec<String> {
        self.lanes
            .iter()
            .filter(|l| l.credit > 0)
            .map(|l| l.name.clone())
            .collect()
    }

    /// Charge one credit to `queue`.
    pub fn consume(&mut self, queue: &str) {
        if let Some(lane) = self.lanes.iter_mut().find(|l| l.name == queue) {
            lane.credit = lane.credit.saturating_sub(1);
        }
    }

    /// Start a new cycle.
    pub fn reset(&mut self) {
        for lane in &mut self.lanes {
            lane.credit = lane.weight;
        }
    }

    fn any_spent(&self) -> bool {
        self.lanes.iter().any(|l| l.credit < l.weight)
    }

    /// Dequeue the next task according to the credit counters.
    ///
    /// The store call itself is the atomic Pending -> Active move; this only
    /// decides which lanes to offer it, and in which order.
    pub async fn next(
        &mut self,
        store: &dyn TaskStore,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let candidates = self.candidates();
        if !candidates.is_empty()
            && let Some(task) = store.dequeue(&candidates, now).await?
        {
            self.consume(&task.queue);
            return Ok(Some(task));
        }

        // Lanes with credit are empty. If nobody spent credit this cycle,
        // there is nothing pending anywhere.
        if !self.any_spent() {
            return Ok(None);
        }

        self.reset();
        let task = store.dequeue(&self.queue_names(), now).await?;
        if let Some(task) = &task {
            self.consume(&task.queue);
        }
        Ok(task)
    }
}
