//! Durable record store
//!
//! All persisted state (tasks, agent statistics, assessments, the event log
//! and lock records) goes through [`RecordStore`]. Reads that hit a row
//! which no longer parses or validates come back as [`Loaded::Recovered`]
//! with the offending row moved to quarantine; only I/O failures are errors.

mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use sqlite::SqliteStore;

use crate::agent::{AgentId, AgentPerformance};
use crate::events::{Event, RecordedEvent};
use crate::quality::AssessmentRecord;
use crate::task::{Task, TaskId};
use crate::Result;

/// A value read from the store, possibly rebuilt after corruption
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded<T> {
    /// Everything parsed
    Intact(T),
    /// Some input was unreadable; `value` is the fallback
    Recovered { value: T, reason: String },
}

impl<T> Loaded<T> {
    /// `Intact` when there are no problems, otherwise `Recovered` with the
    /// problems joined into one reason
    pub fn from_problems(value: T, problems: Vec<String>) -> Self {
        if problems.is_empty() {
            Self::Intact(value)
        } else {
            Self::Recovered {
                value,
                reason: problems.join("; "),
            }
        }
    }

    pub const fn value(&self) -> &T {
        match self {
            Self::Intact(value) | Self::Recovered { value, .. } => value,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Intact(value) | Self::Recovered { value, .. } => value,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Intact(_) => None,
            Self::Recovered { reason, .. } => Some(reason),
        }
    }

    pub const fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loaded<U> {
        match self {
            Self::Intact(value) => Loaded::Intact(f(value)),
            Self::Recovered { value, reason } => Loaded::Recovered {
                value: f(value),
                reason,
            },
        }
    }
}

/// Writes applied atomically by [`RecordStore::commit`]
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub tasks: Vec<Task>,
    pub agents: Vec<AgentPerformance>,
    pub assessments: Vec<AssessmentRecord>,
    pub events: Vec<Event>,
}

impl Changeset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a task, replacing an earlier copy in this changeset
    pub fn put_task(&mut self, task: Task) {
        self.tasks.retain(|t| t.id != task.id);
        self.tasks.push(task);
    }

    pub fn put_agent(&mut self, agent: AgentPerformance) {
        self.agents.retain(|a| a.agent_id != agent.agent_id);
        self.agents.push(agent);
    }

    pub fn push_assessment(&mut self, record: AssessmentRecord) {
        self.assessments.push(record);
    }

    pub fn push_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.agents.is_empty()
            && self.assessments.is_empty()
            && self.events.is_empty()
    }
}

/// One lock record per protected resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource: String,
    pub owner_id: String,
    /// Unique per acquisition; stale reclaim deletes by token so a lock
    /// re-taken in the meantime is left alone
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub holder_pid: Option<u32>,
}

impl LockRecord {
    #[must_use]
    pub fn new(resource: impl Into<String>, owner_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            resource: resource.into(),
            owner_id: owner_id.into(),
            token: uuid::Uuid::new_v4().to_string(),
            acquired_at: now,
            holder_pid: Some(std::process::id()),
        }
    }
}

/// Persistence boundary for the coordination core.
///
/// Mutating task or agent rows is only safe while holding the board lock;
/// [`RecordStore::append_event`] is safe without it.
#[async_trait]
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    async fn load_task(&self, id: &TaskId) -> Result<Loaded<Option<Task>>>;

    /// Every task, ordered by base priority then creation time
    async fn load_tasks(&self) -> Result<Loaded<Vec<Task>>>;

    async fn load_agent(&self, id: &AgentId) -> Result<Loaded<Option<AgentPerformance>>>;

    async fn load_agents(&self) -> Result<Loaded<Vec<AgentPerformance>>>;

    /// Every assessment, oldest first
    async fn load_assessments(&self) -> Result<Loaded<Vec<AssessmentRecord>>>;

    /// Apply all writes in one transaction, returning the appended events
    async fn commit(&self, changes: Changeset) -> Result<Vec<RecordedEvent>>;

    /// Append one event outside any transaction
    async fn append_event(&self, event: Event) -> Result<RecordedEvent>;

    /// Events with `seq > after`, oldest first, at most `limit`
    async fn events_since(&self, after: i64, limit: usize) -> Result<Loaded<Vec<RecordedEvent>>>;

    /// Create the lock record if the resource is free
    async fn try_insert_lock(&self, record: &LockRecord) -> Result<bool>;

    /// Read the current lock record; an unreadable `acquired_at` recovers as
    /// the Unix epoch so the lock is judged stale
    async fn read_lock(&self, resource: &str) -> Result<Option<Loaded<LockRecord>>>;

    /// Delete the lock only if it still carries `token`
    async fn delete_lock_if_token(&self, resource: &str, token: &str) -> Result<bool>;

    /// Delete the lock only if `owner_id` holds it
    async fn delete_lock_if_owner(&self, resource: &str, owner_id: &str) -> Result<bool>;

    async fn list_locks(&self) -> Result<Vec<Loaded<LockRecord>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_problems() {
        assert_eq!(Loaded::from_problems(1, vec![]), Loaded::Intact(1));
        let loaded = Loaded::from_problems(1, vec!["a".into(), "b".into()]);
        assert_eq!(loaded.reason(), Some("a; b"));
        assert_eq!(loaded.map(|v| v + 1).into_inner(), 2);
    }

    #[test]
    fn test_changeset_put_task_replaces() {
        use crate::task::NewTask;

        let now = Utc::now();
        let mut changes = Changeset::new();
        let mut task = Task::new(TaskId::new("t-1"), NewTask::new("first"), now);
        changes.put_task(task.clone());
        task.title = "second".into();
        changes.put_task(task);

        assert_eq!(changes.tasks.len(), 1);
        assert_eq!(changes.tasks[0].title, "second");
    }
}
