//! The shared task board
//!
//! [`TaskBoard`] is the only mutation path for tasks and agent statistics.
//! Every read-modify-write runs under the board lock and lands in one store
//! transaction together with its events, so concurrent agent processes
//! never lose updates and never both win a claim.
//!
//! Expected concurrency results (already claimed, not found, not the owner)
//! come back as outcome enums inside `Ok`; only store failures and lock
//! timeouts are errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::agent::{AgentId, AgentPerformance};
use crate::clock::{Clock, SystemClock};
use crate::config::BoardConfig;
use crate::dependency::{self, Eligibility, UnknownDependencyPolicy};
use crate::events::{Event, EventKind, RecordedEvent};
use crate::lock::{LockGuard, LockManager, LockOptions, LockStatus};
use crate::quality::{self, AssessmentRecord, Dimension, TrendSummary};
use crate::scheduler::{PriorityScheduler, ScheduledTask};
use crate::store::{Changeset, LockRecord, Loaded, RecordStore, SqliteStore};
use crate::task::{NewTask, Task, TaskId, TaskStatus};
use crate::{Error, Result};

/// Lock resource guarding the task and agent tables
pub const BOARD_LOCK: &str = "backlog.board";

/// Result of [`TaskBoard::create_task`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedTask {
    pub task: Task,
    /// Unknown dependency ids that were dropped
    pub dropped_dependencies: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// The caller owns the task (also returned when it already did)
    Claimed { task: Task },
    AlreadyClaimed { owner: AgentId },
    AlreadyCompleted,
    NotFound,
    /// Blocked or cancelled tasks cannot be claimed
    Ineligible { status: TaskStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompleteOutcome {
    Completed { task: Task, unblocked: Vec<TaskId> },
    AlreadyCompleted,
    NotFound,
    NotOwner { owner: AgentId },
    NotClaimed { status: TaskStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Updated { task: Task, unblocked: Vec<TaskId> },
    NotFound,
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssessOutcome {
    Assessed { record: AssessmentRecord },
    NotFound,
    NotCompleted { status: TaskStatus },
}

/// Quality trend across every assessment and per agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub overall: TrendSummary,
    pub by_agent: BTreeMap<AgentId, TrendSummary>,
}

/// Coordination facade shared by every agent process
#[derive(Debug, Clone)]
pub struct TaskBoard {
    store: Arc<dyn RecordStore>,
    locks: LockManager,
    scheduler: PriorityScheduler,
    clock: Arc<dyn Clock>,
    owner_id: String,
    on_unknown: UnknownDependencyPolicy,
}

impl TaskBoard {
    /// Open the `SQLite` store named in `config`
    pub async fn open(config: &BoardConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.store.path).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, config: &BoardConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: Arc<dyn RecordStore>, config: &BoardConfig, clock: Arc<dyn Clock>) -> Self {
        let locks = LockManager::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            LockOptions::from(&config.lock),
        );
        Self {
            store,
            locks,
            scheduler: PriorityScheduler::new(&config.scheduler),
            clock,
            owner_id: default_owner_id(),
            on_unknown: config.dependencies.on_unknown,
        }
    }

    /// Override the identity this board uses as lock owner
    #[must_use]
    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    #[must_use]
    pub const fn locks(&self) -> &LockManager {
        &self.locks
    }

    #[must_use]
    pub const fn scheduler(&self) -> &PriorityScheduler {
        &self.scheduler
    }

    // ═══════════════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn get_task(&self, id: &TaskId) -> Result<Loaded<Option<Task>>> {
        self.store.load_task(id).await
    }

    /// Tasks ordered by base priority, then creation
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Loaded<Vec<Task>>> {
        let loaded = self.store.load_tasks().await?;
        Ok(loaded.map(|tasks| {
            let mut tasks: Vec<Task> = tasks
                .into_iter()
                .filter(|t| status.map_or(true, |s| t.status == s))
                .collect();
            // stable: equal priorities keep creation order
            tasks.sort_by_key(|t| t.priority.base());
            tasks
        }))
    }

    /// The task an agent should pick up next
    pub async fn next(&self) -> Result<Option<Task>> {
        let tasks = self.load_tasks_logged().await?;
        Ok(self.scheduler.next(&tasks, self.clock.now()).cloned())
    }

    /// Claimable tasks ranked for batch planning
    pub async fn schedule(&self, limit: usize) -> Result<Vec<ScheduledTask>> {
        let tasks = self.load_tasks_logged().await?;
        Ok(self.scheduler.schedule(&tasks, limit, self.clock.now()))
    }

    pub async fn agent_metrics(&self, agent_id: &AgentId) -> Result<Loaded<Option<AgentPerformance>>> {
        self.store.load_agent(agent_id).await
    }

    pub async fn list_agents(&self) -> Result<Loaded<Vec<AgentPerformance>>> {
        self.store.load_agents().await
    }

    /// Trend over every assessment (oldest first) and per credited agent
    pub async fn quality_trend(&self) -> Result<QualityReport> {
        let assessments = self.store.load_assessments().await?.into_inner();
        let overall: Vec<f64> = assessments.iter().map(|a| a.overall).collect();

        let mut per_agent: BTreeMap<AgentId, Vec<f64>> = BTreeMap::new();
        for record in &assessments {
            if let Some(agent) = &record.agent_id {
                per_agent.entry(agent.clone()).or_default().push(record.overall);
            }
        }

        Ok(QualityReport {
            overall: quality::summarize_trend(&overall),
            by_agent: per_agent
                .into_iter()
                .map(|(agent, scores)| (agent, quality::summarize_trend(&scores)))
                .collect(),
        })
    }

    pub async fn events_since(&self, after: i64, limit: usize) -> Result<Loaded<Vec<RecordedEvent>>> {
        self.store.events_since(after, limit).await
    }

    pub async fn lock_status(&self) -> Result<Vec<LockStatus>> {
        self.locks.status().await
    }

    pub async fn sweep_stale_locks(&self) -> Result<Vec<LockRecord>> {
        self.locks.sweep_stale(&self.owner_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MUTATIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Add a task; it starts blocked if any dependency is not completed
    pub async fn create_task(&self, request: NewTask) -> Result<CreatedTask> {
        if request.title.trim().is_empty() {
            return Err(Error::InvalidInput("task title must not be empty".to_string()));
        }
        if let Some(hours) = request.estimated_hours {
            if !hours.is_finite() || hours < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "estimated hours must be a non-negative number, got {hours}"
                )));
            }
        }

        let guard = self.lock().await?;
        let result = self.create_locked(request).await;
        finish(guard, result).await
    }

    async fn create_locked(&self, request: NewTask) -> Result<CreatedTask> {
        let now = self.clock.now();
        let all = self.load_tasks_logged().await?;

        let mut task = Task::new(TaskId::generate(), request, now);
        let admission = dependency::on_task_created(&mut task, &all, self.on_unknown)?;

        let mut changes = Changeset::new();
        changes.push_event(
            Event::for_task(EventKind::TaskCreated, &task.id, &self.owner_id, now).with_data(
                serde_json::json!({
                    "title": task.title,
                    "priority": task.priority,
                    "status": task.status,
                }),
            ),
        );
        changes.push_event(match task.status {
            TaskStatus::Blocked => Event::for_task(EventKind::TaskBlocked, &task.id, &self.owner_id, now)
                .with_data(serde_json::json!({ "blocked_by": admission.unmet })),
            _ => Event::for_task(EventKind::TaskAvailable, &task.id, &self.owner_id, now),
        });
        changes.put_task(task.clone());
        self.store.commit(changes).await?;

        info!(task_id = %task.id, status = %task.status, priority = %task.priority, "Created task");
        Ok(CreatedTask {
            task,
            dropped_dependencies: admission.dropped,
        })
    }

    /// Exclusively assign a pending task to `agent_id`
    pub async fn claim(&self, task_id: &TaskId, agent_id: &AgentId) -> Result<ClaimOutcome> {
        let guard = self.lock().await?;
        let result = self.claim_locked(task_id, agent_id).await;
        finish(guard, result).await
    }

    async fn claim_locked(&self, task_id: &TaskId, agent_id: &AgentId) -> Result<ClaimOutcome> {
        let all = self.load_tasks_logged().await?;
        let Some(current) = all.iter().find(|t| &t.id == task_id) else {
            return Ok(ClaimOutcome::NotFound);
        };

        match (current.status, &current.assigned_to) {
            (TaskStatus::Completed, _) => return Ok(ClaimOutcome::AlreadyCompleted),
            (TaskStatus::InProgress, Some(owner)) if owner == agent_id => {
                return Ok(ClaimOutcome::Claimed {
                    task: current.clone(),
                });
            }
            (TaskStatus::InProgress, Some(owner)) => {
                return Ok(ClaimOutcome::AlreadyClaimed {
                    owner: owner.clone(),
                });
            }
            (TaskStatus::Pending, _) if Eligibility::new(&all).is_eligible(current) => {}
            (status, _) => return Ok(ClaimOutcome::Ineligible { status }),
        }

        let now = self.clock.now();
        let mut task = current.clone();
        task.status = TaskStatus::InProgress;
        task.assigned_to = Some(agent_id.clone());
        task.claimed_at = Some(now);
        task.updated_at = now;

        let mut agent = self.load_agent_or_new(agent_id, now).await?;
        agent.record_claim(now);

        let mut changes = Changeset::new();
        changes.put_task(task.clone());
        changes.put_agent(agent);
        changes.push_event(
            Event::for_task(EventKind::TaskClaimed, &task.id, agent_id.as_str(), now)
                .with_data(serde_json::json!({ "agent_id": agent_id })),
        );
        self.store.commit(changes).await?;

        info!(task_id = %task.id, agent_id = %agent_id, "Claimed task");
        Ok(ClaimOutcome::Claimed { task })
    }

    /// Mark a task the agent owns as completed and unblock its dependents
    pub async fn complete(&self, task_id: &TaskId, agent_id: &AgentId) -> Result<CompleteOutcome> {
        let guard = self.lock().await?;
        let result = self.complete_locked(task_id, Some(agent_id), None).await;
        finish(guard, result).await
    }

    /// Shared by `complete` and `update_status`; `agent_id` of `None`
    /// credits whoever holds the task
    async fn complete_locked(
        &self,
        task_id: &TaskId,
        agent_id: Option<&AgentId>,
        note: Option<&str>,
    ) -> Result<CompleteOutcome> {
        let mut all = self.load_tasks_logged().await?;
        let Some(index) = all.iter().position(|t| &t.id == task_id) else {
            return Ok(CompleteOutcome::NotFound);
        };

        let current = &all[index];
        let owner = match (current.status, &current.assigned_to) {
            (TaskStatus::Completed, _) => return Ok(CompleteOutcome::AlreadyCompleted),
            (TaskStatus::InProgress, Some(owner)) => owner.clone(),
            (status, _) => return Ok(CompleteOutcome::NotClaimed { status }),
        };
        if agent_id.is_some_and(|caller| caller != &owner) {
            return Ok(CompleteOutcome::NotOwner { owner });
        }

        let now = self.clock.now();
        {
            let task = &mut all[index];
            task.status = TaskStatus::Completed;
            task.completed_at = Some(now.max(task.created_at));
            task.updated_at = now;
            if let Some(text) = note {
                task.add_note(text, now);
            }
        }
        let duration = all[index].work_duration_secs();
        let unblocked = dependency::on_task_completed(task_id, &mut all, now);

        let mut agent = self.load_agent_or_new(&owner, now).await?;
        agent.record_completion(duration, now);

        let mut changes = Changeset::new();
        changes.put_task(all[index].clone());
        for dependent in dependency::dependents_of(task_id, &all) {
            changes.put_task(dependent.clone());
        }
        changes.put_agent(agent);
        changes.push_event(
            Event::for_task(EventKind::TaskCompleted, task_id, owner.as_str(), now).with_data(
                serde_json::json!({ "agent_id": owner, "duration_secs": duration }),
            ),
        );
        for id in &unblocked {
            changes.push_event(
                Event::for_task(EventKind::TaskUnblocked, id, owner.as_str(), now)
                    .with_data(serde_json::json!({ "completed_dependency": task_id })),
            );
            changes.push_event(Event::for_task(EventKind::TaskAvailable, id, owner.as_str(), now));
        }
        self.store.commit(changes).await?;

        info!(task_id = %task_id, agent_id = %owner, unblocked = unblocked.len(), "Completed task");
        Ok(CompleteOutcome::Completed {
            task: all[index].clone(),
            unblocked,
        })
    }

    /// Move a task to `completed` or `cancelled`, or just attach a note when
    /// `new_status` equals the current status.
    ///
    /// Claiming and dependency gating own the other transitions, so asking
    /// for `in_progress`, `pending` or `blocked` here is an invalid transition.
    pub async fn update_status(
        &self,
        task_id: &TaskId,
        new_status: TaskStatus,
        note: Option<&str>,
    ) -> Result<UpdateOutcome> {
        let guard = self.lock().await?;
        let result = self.update_status_locked(task_id, new_status, note).await;
        finish(guard, result).await
    }

    async fn update_status_locked(
        &self,
        task_id: &TaskId,
        new_status: TaskStatus,
        note: Option<&str>,
    ) -> Result<UpdateOutcome> {
        let Some(mut task) = self.load_task_logged(task_id).await? else {
            return Ok(UpdateOutcome::NotFound);
        };
        let from = task.status;

        if from == new_status {
            return Ok(match note {
                Some(text) => self.note_locked(task, text).await?,
                None => UpdateOutcome::Updated {
                    task,
                    unblocked: Vec::new(),
                },
            });
        }

        let invalid = UpdateOutcome::InvalidTransition {
            from,
            to: new_status,
        };
        if !from.can_transition_to(new_status) {
            return Ok(invalid);
        }

        match new_status {
            TaskStatus::Completed => Ok(match self.complete_locked(task_id, None, note).await? {
                CompleteOutcome::Completed { task, unblocked } => UpdateOutcome::Updated { task, unblocked },
                CompleteOutcome::NotFound => UpdateOutcome::NotFound,
                _ => invalid,
            }),
            TaskStatus::Cancelled => {
                let now = self.clock.now();
                task.status = TaskStatus::Cancelled;
                task.updated_at = now;
                if let Some(text) = note {
                    task.add_note(text, now);
                }

                let all = self.load_tasks_logged().await?;
                let stranded: Vec<&TaskId> = dependency::dependents_of(task_id, &all)
                    .filter(|t| !t.status.is_terminal())
                    .map(|t| &t.id)
                    .collect();
                if !stranded.is_empty() {
                    warn!(task_id = %task_id, ?stranded, "Cancelled task has open dependents that stay blocked");
                }

                let mut changes = Changeset::new();
                changes.put_task(task.clone());
                changes.push_event(
                    Event::for_task(EventKind::TaskCancelled, task_id, &self.owner_id, now)
                        .with_data(serde_json::json!({ "previous_status": from, "note": note })),
                );
                self.store.commit(changes).await?;

                info!(task_id = %task_id, previous = %from, "Cancelled task");
                Ok(UpdateOutcome::Updated {
                    task,
                    unblocked: Vec::new(),
                })
            }
            _ => Ok(invalid),
        }
    }

    pub async fn cancel(&self, task_id: &TaskId, reason: Option<&str>) -> Result<UpdateOutcome> {
        self.update_status(task_id, TaskStatus::Cancelled, reason).await
    }

    /// Append a timestamped note; `NotFound` if the task does not exist
    pub async fn add_note(&self, task_id: &TaskId, text: &str) -> Result<UpdateOutcome> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("note must not be empty".to_string()));
        }
        let guard = self.lock().await?;
        let result = async {
            match self.load_task_logged(task_id).await? {
                Some(task) => self.note_locked(task, text).await,
                None => Ok(UpdateOutcome::NotFound),
            }
        }
        .await;
        finish(guard, result).await
    }

    async fn note_locked(&self, mut task: Task, text: &str) -> Result<UpdateOutcome> {
        let now = self.clock.now();
        task.add_note(text, now);

        let mut changes = Changeset::new();
        changes.put_task(task.clone());
        changes.push_event(
            Event::for_task(EventKind::NoteAdded, &task.id, &self.owner_id, now)
                .with_data(serde_json::json!({ "text": text })),
        );
        self.store.commit(changes).await?;

        Ok(UpdateOutcome::Updated {
            task,
            unblocked: Vec::new(),
        })
    }

    /// Score a completed task and fold the result into its agent's statistics
    pub async fn assess(
        &self,
        task_id: &TaskId,
        scores: &BTreeMap<Dimension, f64>,
        lessons_learned: Vec<String>,
    ) -> Result<AssessOutcome> {
        // Reject bad scores before taking the lock
        quality::resolve_scores(scores)?;

        let guard = self.lock().await?;
        let result = self.assess_locked(task_id, scores, lessons_learned).await;
        finish(guard, result).await
    }

    async fn assess_locked(
        &self,
        task_id: &TaskId,
        scores: &BTreeMap<Dimension, f64>,
        lessons_learned: Vec<String>,
    ) -> Result<AssessOutcome> {
        let Some(mut task) = self.load_task_logged(task_id).await? else {
            return Ok(AssessOutcome::NotFound);
        };
        if task.status != TaskStatus::Completed {
            return Ok(AssessOutcome::NotCompleted {
                status: task.status,
            });
        }

        let now = self.clock.now();
        let record = AssessmentRecord::new(
            task.id.clone(),
            task.assigned_to.clone(),
            scores,
            lessons_learned,
            now,
        )?;

        task.quality_score = Some(record.overall);
        task.updated_at = now;

        let mut changes = Changeset::new();
        if let Some(agent_id) = &task.assigned_to {
            let mut agent = self.load_agent_or_new(agent_id, now).await?;
            agent.record_quality(record.overall, now);
            changes.put_agent(agent);
        }
        changes.put_task(task);
        changes.push_assessment(record.clone());
        changes.push_event(
            Event::for_task(EventKind::QualityAssessed, task_id, &self.owner_id, now).with_data(
                serde_json::json!({ "overall": record.overall, "agent_id": record.agent_id }),
            ),
        );
        self.store.commit(changes).await?;

        info!(task_id = %task_id, overall = record.overall, "Recorded quality assessment");
        Ok(AssessOutcome::Assessed { record })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════════════

    async fn lock(&self) -> Result<LockGuard> {
        self.locks.acquire_default(BOARD_LOCK, &self.owner_id).await
    }

    async fn load_tasks_logged(&self) -> Result<Vec<Task>> {
        Ok(log_recovery(self.store.load_tasks().await?))
    }

    async fn load_task_logged(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(log_recovery(self.store.load_task(id).await?))
    }

    /// Existing statistics, or a fresh record if none exist or they were unreadable
    async fn load_agent_or_new(&self, agent_id: &AgentId, now: DateTime<Utc>) -> Result<AgentPerformance> {
        Ok(log_recovery(self.store.load_agent(agent_id).await?)
            .unwrap_or_else(|| AgentPerformance::new(agent_id.clone(), now)))
    }
}

fn log_recovery<T>(loaded: Loaded<T>) -> T {
    if let Some(reason) = loaded.reason() {
        warn!(%reason, "Continuing with recovered store data");
    }
    loaded.into_inner()
}

/// Release the board lock, then surface the operation's own error first
async fn finish<T>(guard: LockGuard, result: Result<T>) -> Result<T> {
    let released = guard.release().await;
    let value = result?;
    released?;
    Ok(value)
}

fn default_owner_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "pid-{}-{}",
        std::process::id(),
        suffix.chars().take(8).collect::<String>()
    )
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::task::{Complexity, Priority};

    async fn board() -> Result<(TaskBoard, Arc<ManualClock>)> {
        let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::in_memory().await?);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let board = TaskBoard::with_clock(store, &BoardConfig::default(), clock.clone());
        Ok((board, clock))
    }

    fn w(id: &str) -> AgentId {
        AgentId::new(id)
    }

    async fn claimed_task(board: &TaskBoard, title: &str, agent: &AgentId) -> Result<Task> {
        let created = board.create_task(NewTask::new(title)).await?;
        match board.claim(&created.task.id, agent).await? {
            ClaimOutcome::Claimed { task } => Ok(task),
            other => Err(Error::InvalidInput(format!("unexpected claim outcome {other:?}"))),
        }
    }

    #[tokio::test]
    async fn test_create_without_dependencies_is_pending() -> Result<()> {
        let (board, _) = board().await?;
        let created = board
            .create_task(NewTask::new("write docs").with_priority(Priority::High))
            .await?;
        assert_eq!(created.task.status, TaskStatus::Pending);

        let kinds: Vec<_> = board
            .events_since(0, 10)
            .await?
            .into_inner()
            .into_iter()
            .map(|e| e.event.kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::TaskCreated, EventKind::TaskAvailable]);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_title_rejected() -> Result<()> {
        let (board, _) = board().await?;
        let result = board.create_task(NewTask::new("  ")).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_dependency_dropped_by_default() -> Result<()> {
        let (board, _) = board().await?;
        let created = board
            .create_task(NewTask::new("b").with_dependency(TaskId::new("t-ghost")))
            .await?;
        assert_eq!(created.dropped_dependencies, vec![TaskId::new("t-ghost")]);
        assert!(created.task.depends_on.is_empty());
        assert_eq!(created.task.status, TaskStatus::Pending);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_dependency_rejected_by_policy() -> Result<()> {
        let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::in_memory().await?);
        let mut config = BoardConfig::default();
        config.dependencies.on_unknown = UnknownDependencyPolicy::Reject;
        let board = TaskBoard::new(store, &config);

        let result = board
            .create_task(NewTask::new("b").with_dependency(TaskId::new("t-ghost")))
            .await;
        assert!(matches!(result, Err(Error::InvalidDependency(_))));
        assert!(board.list_tasks(None).await?.into_inner().is_empty());
        // the lock was released despite the error
        assert!(board.lock_status().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_is_idempotent_for_owner() -> Result<()> {
        let (board, _) = board().await?;
        let task = claimed_task(&board, "a", &w("w1")).await?;

        let again = board.claim(&task.id, &w("w1")).await?;
        assert_eq!(again, ClaimOutcome::Claimed { task: task.clone() });

        let claims = board
            .events_since(0, 100)
            .await?
            .into_inner()
            .iter()
            .filter(|e| e.event.kind == EventKind::TaskClaimed)
            .count();
        assert_eq!(claims, 1);

        let metrics = board.agent_metrics(&w("w1")).await?.into_inner();
        assert_eq!(metrics.map(|m| m.tasks_claimed), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_outcomes() -> Result<()> {
        let (board, _) = board().await?;
        let task = claimed_task(&board, "a", &w("w1")).await?;

        assert_eq!(
            board.claim(&task.id, &w("w2")).await?,
            ClaimOutcome::AlreadyClaimed { owner: w("w1") }
        );
        assert_eq!(
            board.claim(&TaskId::new("t-missing"), &w("w2")).await?,
            ClaimOutcome::NotFound
        );

        board.complete(&task.id, &w("w1")).await?;
        assert_eq!(board.claim(&task.id, &w("w2")).await?, ClaimOutcome::AlreadyCompleted);
        Ok(())
    }

    #[tokio::test]
    async fn test_blocked_task_cannot_be_claimed() -> Result<()> {
        let (board, _) = board().await?;
        let a = board.create_task(NewTask::new("a")).await?.task;
        let b = board
            .create_task(NewTask::new("b").with_dependency(a.id.clone()))
            .await?
            .task;

        assert_eq!(
            board.claim(&b.id, &w("w1")).await?,
            ClaimOutcome::Ineligible {
                status: TaskStatus::Blocked
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_requires_owner() -> Result<()> {
        let (board, clock) = board().await?;
        let task = claimed_task(&board, "a", &w("w1")).await?;

        assert_eq!(
            board.complete(&task.id, &w("w2")).await?,
            CompleteOutcome::NotOwner { owner: w("w1") }
        );

        clock.advance(Duration::minutes(30));
        let CompleteOutcome::Completed { task, .. } = board.complete(&task.id, &w("w1")).await? else {
            return Err(Error::InvalidInput("expected completion".into()));
        };
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at >= Some(task.created_at));

        let metrics = board
            .agent_metrics(&w("w1"))
            .await?
            .into_inner()
            .ok_or_else(|| Error::InvalidInput("missing metrics".into()))?;
        assert_eq!(metrics.tasks_completed, 1);
        assert_eq!(metrics.total_duration_secs, 1800.0);

        assert_eq!(board.complete(&task.id, &w("w1")).await?, CompleteOutcome::AlreadyCompleted);
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_unclaimed_is_rejected() -> Result<()> {
        let (board, _) = board().await?;
        let task = board.create_task(NewTask::new("a")).await?.task;
        assert_eq!(
            board.complete(&task.id, &w("w1")).await?,
            CompleteOutcome::NotClaimed {
                status: TaskStatus::Pending
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_update_status_rules() -> Result<()> {
        let (board, _) = board().await?;
        let task = board.create_task(NewTask::new("a")).await?.task;

        assert_eq!(
            board.update_status(&task.id, TaskStatus::InProgress, None).await?,
            UpdateOutcome::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::InProgress
            }
        );
        assert_eq!(
            board.update_status(&task.id, TaskStatus::Completed, None).await?,
            UpdateOutcome::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed
            }
        );

        let UpdateOutcome::Updated { task: cancelled, .. } =
            board.cancel(&task.id, Some("duplicate")).await?
        else {
            return Err(Error::InvalidInput("expected cancel".into()));
        };
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(cancelled.notes.len(), 1);

        // terminal
        assert!(matches!(
            board.update_status(&task.id, TaskStatus::Pending, None).await?,
            UpdateOutcome::InvalidTransition { .. }
        ));
        assert_eq!(
            board.update_status(&TaskId::new("t-nope"), TaskStatus::Cancelled, None).await?,
            UpdateOutcome::NotFound
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_update_status_completed_credits_assignee() -> Result<()> {
        let (board, _) = board().await?;
        let task = claimed_task(&board, "a", &w("w1")).await?;

        let outcome = board
            .update_status(&task.id, TaskStatus::Completed, Some("done via status"))
            .await?;
        let UpdateOutcome::Updated { task, .. } = outcome else {
            return Err(Error::InvalidInput("expected update".into()));
        };
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.notes[0].text, "done via status");

        let metrics = board.agent_metrics(&w("w1")).await?.into_inner();
        assert_eq!(metrics.map(|m| m.tasks_completed), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_add_note() -> Result<()> {
        let (board, _) = board().await?;
        let task = board.create_task(NewTask::new("a")).await?.task;

        let UpdateOutcome::Updated { task, .. } = board.add_note(&task.id, "looked at it").await? else {
            return Err(Error::InvalidInput("expected note".into()));
        };
        assert_eq!(task.notes.len(), 1);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(
            board.add_note(&TaskId::new("t-nope"), "x").await?,
            UpdateOutcome::NotFound
        );
        assert!(board.add_note(&task.id, " ").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_assess_updates_task_and_agent() -> Result<()> {
        let (board, _) = board().await?;
        let task = claimed_task(&board, "a", &w("w1")).await?;

        let early = board.assess(&task.id, &BTreeMap::new(), vec![]).await?;
        assert_eq!(
            early,
            AssessOutcome::NotCompleted {
                status: TaskStatus::InProgress
            }
        );

        board.complete(&task.id, &w("w1")).await?;
        let scores = BTreeMap::from([(Dimension::Completeness, 9.0)]);
        let AssessOutcome::Assessed { record } = board
            .assess(&task.id, &scores, vec!["split the migration".into()])
            .await?
        else {
            return Err(Error::InvalidInput("expected assessment".into()));
        };
        assert_eq!(record.overall, 7.5);
        assert_eq!(record.agent_id, Some(w("w1")));

        let stored = board.get_task(&task.id).await?.into_inner();
        assert_eq!(stored.and_then(|t| t.quality_score), Some(7.5));

        let metrics = board.agent_metrics(&w("w1")).await?.into_inner();
        assert_eq!(metrics.and_then(|m| m.avg_quality), Some(7.5));
        Ok(())
    }

    #[tokio::test]
    async fn test_assess_rejects_bad_scores_without_locking() -> Result<()> {
        let (board, _) = board().await?;
        let scores = BTreeMap::from([(Dimension::Impact, 0.0)]);
        let result = board.assess(&TaskId::new("t-any"), &scores, vec![]).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_orders_by_priority_then_creation() -> Result<()> {
        let (board, clock) = board().await?;
        for (title, priority) in [
            ("low-1", Priority::Low),
            ("crit", Priority::Critical),
            ("low-2", Priority::Low),
            ("med", Priority::Medium),
        ] {
            board
                .create_task(NewTask::new(title).with_priority(priority).with_complexity(Complexity::Simple))
                .await?;
            clock.advance(Duration::seconds(1));
        }

        let titles: Vec<String> = board
            .list_tasks(None)
            .await?
            .into_inner()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["crit", "med", "low-1", "low-2"]);

        let blocked = board.list_tasks(Some(TaskStatus::Blocked)).await?.into_inner();
        assert!(blocked.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_quality_trend_report() -> Result<()> {
        let (board, _) = board().await?;
        for score in [5.0, 5.0, 9.0, 9.0] {
            let task = claimed_task(&board, "t", &w("w1")).await?;
            board.complete(&task.id, &w("w1")).await?;
            let scores = quality_scores_all(score);
            board.assess(&task.id, &scores, vec![]).await?;
        }

        let report = board.quality_trend().await?;
        assert_eq!(report.overall.trend, quality::Trend::Improving);
        assert_eq!(report.overall.samples, 4);
        assert_eq!(report.by_agent.get(&w("w1")).map(|s| s.trend), Some(quality::Trend::Improving));
        Ok(())
    }

    fn quality_scores_all(score: f64) -> BTreeMap<Dimension, f64> {
        use strum::IntoEnumIterator;
        Dimension::iter().map(|d| (d, score)).collect()
    }
}
