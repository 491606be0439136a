//! Priority scheduling with time-based aging
//!
//! ```text
//! effective = base(priority) - min(hours_waiting * aging_rate(priority), aging_cap)
//! ```
//!
//! Lower is more urgent. With the cap below 3 a waiting low-priority task can
//! approach, but never pass, a fresh critical one.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{AgingRates, ComplexityPenalties, SchedulerConfig};
use crate::dependency::Eligibility;
use crate::task::{Priority, Task};

/// Base of the least urgent level, plus one; keeps urgency scores positive
const URGENCY_CEILING: f64 = 4.0;

/// A task ranked for batch planning
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTask {
    pub task: Task,
    pub effective_priority: f64,
    pub hours_waiting: f64,
    /// Higher is more urgent; folds in a complexity penalty
    pub urgency_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorityScheduler {
    aging_rate: AgingRates,
    aging_cap: f64,
    complexity_penalty: ComplexityPenalties,
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new(&SchedulerConfig::default())
    }
}

impl PriorityScheduler {
    #[must_use]
    pub const fn new(config: &SchedulerConfig) -> Self {
        Self {
            aging_rate: config.aging_rate,
            aging_cap: config.aging_cap,
            complexity_penalty: config.complexity_penalty,
        }
    }

    #[must_use]
    pub const fn aging_cap(&self) -> f64 {
        self.aging_cap
    }

    /// Hours since creation, never negative
    #[must_use]
    pub fn hours_waiting(task: &Task, now: DateTime<Utc>) -> f64 {
        let millis = (now - task.created_at).num_milliseconds().max(0);
        millis as f64 / 3_600_000.0
    }

    /// Bonus earned by waiting, capped
    #[must_use]
    pub fn aging_bonus(&self, priority: Priority, hours_waiting: f64) -> f64 {
        (hours_waiting * self.aging_rate.rate(priority)).min(self.aging_cap)
    }

    #[must_use]
    pub fn effective_priority(&self, task: &Task, now: DateTime<Utc>) -> f64 {
        let hours = Self::hours_waiting(task, now);
        f64::from(task.priority.base()) - self.aging_bonus(task.priority, hours)
    }

    /// Most urgent claimable task: lowest effective priority, then earliest
    /// creation. Ties on both keep the order of `candidates`.
    #[must_use]
    pub fn next<'a>(&self, candidates: &'a [Task], now: DateTime<Utc>) -> Option<&'a Task> {
        let eligibility = Eligibility::new(candidates);
        candidates
            .iter()
            .filter(|t| eligibility.is_claimable(t))
            .map(|t| (self.effective_priority(t, now), t))
            .min_by(|(pa, a), (pb, b)| pa.total_cmp(pb).then_with(|| a.created_at.cmp(&b.created_at)))
            .map(|(_, task)| task)
    }

    /// Claimable tasks ranked by urgency score, at most `limit`.
    ///
    /// Heavier tasks lose a little urgency so that, among similar
    /// priorities, quick wins are planned first.
    #[must_use]
    pub fn schedule(&self, candidates: &[Task], limit: usize, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let eligibility = Eligibility::new(candidates);
        let mut ranked: Vec<ScheduledTask> = candidates
            .iter()
            .filter(|t| eligibility.is_claimable(t))
            .map(|t| {
                let hours_waiting = Self::hours_waiting(t, now);
                let effective_priority = self.effective_priority(t, now);
                let urgency_score = URGENCY_CEILING
                    - effective_priority
                    - self.complexity_penalty.penalty(t.complexity);
                ScheduledTask {
                    task: t.clone(),
                    effective_priority,
                    hours_waiting,
                    urgency_score,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.urgency_score
                .total_cmp(&a.urgency_score)
                .then_with(|| a.task.created_at.cmp(&b.task.created_at))
        });
        ranked.truncate(limit);
        ranked
    }
}
