//! Agent identity and performance statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quality::{self, Trend};

/// Unique agent identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Create a new agent ID
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Running statistics for one agent.
///
/// Created on the first claim or first quality assessment, updated on
/// every completion, never deleted. `avg_duration_secs` and `avg_quality`
/// are derived and recomputed whenever their inputs change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub agent_id: AgentId,
    pub tasks_claimed: u64,
    pub tasks_completed: u64,
    pub total_duration_secs: f64,
    pub avg_duration_secs: Option<f64>,
    #[serde(default)]
    pub quality_scores: Vec<f64>,
    pub avg_quality: Option<f64>,
    pub first_seen: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl AgentPerformance {
    /// Create an empty record first seen at `now`
    #[must_use]
    pub const fn new(agent_id: AgentId, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            tasks_claimed: 0,
            tasks_completed: 0,
            total_duration_secs: 0.0,
            avg_duration_secs: None,
            quality_scores: Vec::new(),
            avg_quality: None,
            first_seen: now,
            last_activity: now,
        }
    }

    pub fn record_claim(&mut self, now: DateTime<Utc>) {
        self.tasks_claimed += 1;
        self.touch(now);
    }

    /// Count a completion that took `duration_secs` of claimed time
    pub fn record_completion(&mut self, duration_secs: Option<f64>, now: DateTime<Utc>) {
        self.tasks_completed += 1;
        // A record rebuilt after corruption may have lost its claim count.
        self.tasks_claimed = self.tasks_claimed.max(self.tasks_completed);
        if let Some(secs) = duration_secs {
            self.total_duration_secs += secs.max(0.0);
        }
        self.avg_duration_secs =
            (self.tasks_completed > 0).then(|| self.total_duration_secs / self.tasks_completed as f64);
        self.touch(now);
    }

    /// Append a quality score; the average covers the full history
    pub fn record_quality(&mut self, score: f64, now: DateTime<Utc>) {
        self.quality_scores.push(score);
        self.avg_quality = quality::mean(&self.quality_scores);
        self.touch(now);
    }

    /// Structural checks applied when a row is read back from the store
    pub fn validate(&self) -> Result<(), String> {
        if self.tasks_completed > self.tasks_claimed {
            return Err(format!(
                "agent {} completed {} tasks but claimed only {}",
                self.agent_id, self.tasks_completed, self.tasks_claimed
            ));
        }
        if let Some(bad) = self.quality_scores.iter().find(|s| !(1.0..=10.0).contains(*s)) {
            return Err(format!("agent {} has quality score {bad} outside 1-10", self.agent_id));
        }
        Ok(())
    }

    /// Trend over this agent's own score history
    #[must_use]
    pub fn quality_trend(&self) -> Trend {
        quality::classify_trend(&self.quality_scores)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}
