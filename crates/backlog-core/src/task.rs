//! Task records and the status lifecycle

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::agent::AgentId;

/// Unique task identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task ID from an existing string
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random ID (`t-` followed by 12 hex digits)
    #[must_use]
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("t-{}", hex.chars().take(12).collect::<String>()))
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority level; lower base value is more urgent
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    EnumString,
    Display,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Base numeric priority: critical 0, high 1, medium 2, low 3
    #[must_use]
    pub const fn base(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

/// Where a task is in its lifecycle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Eligible and waiting for an agent
    Pending,
    /// Waiting on at least one dependency
    Blocked,
    /// Claimed by an agent
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Completed and cancelled tasks never change status again
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// ```text
    /// pending -> blocked       unmet dependency detected
    /// blocked -> pending       all dependencies completed
    /// pending -> in_progress   claimed
    /// in_progress -> completed
    /// pending | blocked | in_progress -> cancelled
    /// ```
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Blocked | Self::InProgress | Self::Cancelled)
                | (Self::Blocked, Self::Pending | Self::Cancelled)
                | (Self::InProgress, Self::Completed | Self::Cancelled)
        )
    }
}

/// Rough size of a task, used to penalize heavy work in batch planning
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    EnumString,
    Display,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Trivial,
    Simple,
    #[default]
    Moderate,
    Complex,
    Epic,
}

/// A timestamped note attached to a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// A unit of work on the shared board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Priority,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
    /// Dependencies that were not completed when last checked
    #[serde(default)]
    pub blocked_by: BTreeSet<TaskId>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub complexity: Complexity,
    pub estimated_hours: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<AgentId>,
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Task {
    /// Build a pending task from a creation request.
    ///
    /// Dependencies are copied as given; the resolver decides the
    /// initial status and prunes unknown ids.
    #[must_use]
    pub fn new(id: TaskId, request: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: request.title,
            description: request.description,
            priority: request.priority,
            status: TaskStatus::Pending,
            depends_on: request.depends_on,
            blocked_by: BTreeSet::new(),
            tags: request.tags,
            complexity: request.complexity,
            estimated_hours: request.estimated_hours,
            created_at: now,
            updated_at: now,
            claimed_at: None,
            completed_at: None,
            assigned_to: None,
            quality_score: None,
            notes: Vec::new(),
        }
    }

    pub fn add_note(&mut self, text: impl Into<String>, at: DateTime<Utc>) {
        self.notes.push(Note {
            at,
            text: text.into(),
        });
        self.updated_at = at;
    }

    /// Structural checks applied when a row is read back from the store
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err(format!("task {} has an empty title", self.id));
        }
        if self.status == TaskStatus::InProgress && self.assigned_to.is_none() {
            return Err(format!("task {} is in_progress with no assignee", self.id));
        }
        if self.status == TaskStatus::Completed {
            match self.completed_at {
                Some(done) if done >= self.created_at => {}
                _ => return Err(format!("task {} is completed without a valid completed_at", self.id)),
            }
        }
        if let Some(score) = self.quality_score {
            if !(1.0..=10.0).contains(&score) {
                return Err(format!("task {} has quality score {score} outside 1-10", self.id));
            }
        }
        Ok(())
    }

    /// Claimed-to-completed duration in seconds, if both ends are known
    #[must_use]
    pub fn work_duration_secs(&self) -> Option<f64> {
        match (self.claimed_at, self.completed_at) {
            (Some(claimed), Some(completed)) => {
                Some(((completed - claimed).num_milliseconds().max(0)) as f64 / 1000.0)
            }
            _ => None,
        }
    }
}

/// Request to create a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub depends_on: BTreeSet<TaskId>,
    pub tags: BTreeSet<String>,
    pub complexity: Complexity,
    pub estimated_hours: Option<f64>,
}

impl NewTask {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_dependency(mut self, id: TaskId) -> Self {
        self.depends_on.insert(id);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    #[must_use]
    pub const fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    #[must_use]
    pub const fn with_estimate(mut self, hours: f64) -> Self {
        self.estimated_hours = Some(hours);
        self
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in [TaskStatus::Completed, TaskStatus::Cancelled] {
            for to in TaskStatus::iter() {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn test_lifecycle_edges() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::Blocked.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Blocked.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_status_text_roundtrips_through_strum_and_serde() -> Result<(), serde_json::Error> {
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
        assert_eq!(
            TaskStatus::from_str("in_progress").ok(),
            Some(TaskStatus::InProgress)
        );
        assert_eq!(serde_json::to_string(&TaskStatus::InProgress)?, "\"in_progress\"");
        Ok(())
    }

    #[test]
    fn test_priority_base_ordering() {
        let bases: Vec<u8> = Priority::iter().map(Priority::base).collect();
        assert_eq!(bases, vec![0, 1, 2, 3]);
        assert_eq!(Priority::from_str("critical").ok(), Some(Priority::Critical));
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("t-"));
        assert_eq!(a.as_str().len(), 14);
    }

    #[test]
    fn test_work_duration() {
        let now = Utc::now();
        let mut task = Task::new(TaskId::new("t-1"), NewTask::new("x"), now);
        assert_eq!(task.work_duration_secs(), None);
        task.claimed_at = Some(now);
        task.completed_at = Some(now + chrono::Duration::seconds(90));
        assert_eq!(task.work_duration_secs(), Some(90.0));
    }
}
