//! Dependency gating and cascade unblocking
//!
//! A task is eligible once every task it depends on is completed. New tasks
//! with outstanding dependencies start blocked; completing a task moves each
//! dependent whose last dependency it was from blocked to pending, once.
//! Cycles cannot form because dependencies must already exist when a task
//! is created.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::warn;

use crate::task::{Task, TaskId, TaskStatus};
use crate::{Error, Result};

/// Handling of dependency ids that name no existing task
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UnknownDependencyPolicy {
    /// Remove them and log a warning
    #[default]
    Drop,
    /// Refuse to create the task
    Reject,
}

/// Result of admitting a new task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub status: TaskStatus,
    pub unmet: BTreeSet<TaskId>,
    /// Unknown ids removed from `depends_on`
    pub dropped: Vec<TaskId>,
}

fn status_index(all: &[Task]) -> HashMap<&TaskId, TaskStatus> {
    all.iter().map(|t| (&t.id, t.status)).collect()
}

/// Dependencies of `task` that are not completed (unknown ids count as unmet)
fn unmet_in(task: &Task, statuses: &HashMap<&TaskId, TaskStatus>) -> BTreeSet<TaskId> {
    task.depends_on
        .iter()
        .filter(|dep| statuses.get(dep) != Some(&TaskStatus::Completed))
        .cloned()
        .collect()
}

/// Every dependency of `task` is completed
#[must_use]
pub fn is_eligible(task: &Task, all: &[Task]) -> bool {
    task.depends_on.is_empty() || unmet_in(task, &status_index(all)).is_empty()
}

/// Eligibility checker that indexes the task list once
#[derive(Debug)]
pub struct Eligibility<'a> {
    statuses: HashMap<&'a TaskId, TaskStatus>,
}

impl<'a> Eligibility<'a> {
    #[must_use]
    pub fn new(all: &'a [Task]) -> Self {
        Self {
            statuses: status_index(all),
        }
    }

    #[must_use]
    pub fn is_eligible(&self, task: &Task) -> bool {
        task.depends_on.is_empty() || unmet_in(task, &self.statuses).is_empty()
    }

    /// Pending and eligible
    #[must_use]
    pub fn is_claimable(&self, task: &Task) -> bool {
        task.status == TaskStatus::Pending && self.is_eligible(task)
    }
}

/// Set the initial status of `new_task` from its dependencies.
///
/// Unknown dependency ids are removed with a warning under
/// [`UnknownDependencyPolicy::Drop`] and rejected with
/// [`Error::InvalidDependency`] under [`UnknownDependencyPolicy::Reject`].
pub fn on_task_created(
    new_task: &mut Task,
    all: &[Task],
    policy: UnknownDependencyPolicy,
) -> Result<Admission> {
    let statuses = status_index(all);

    let unknown: Vec<TaskId> = new_task
        .depends_on
        .iter()
        .filter(|dep| !statuses.contains_key(dep))
        .cloned()
        .collect();

    if !unknown.is_empty() {
        match policy {
            UnknownDependencyPolicy::Reject => return Err(Error::InvalidDependency(unknown)),
            UnknownDependencyPolicy::Drop => {
                warn!(
                    task_id = %new_task.id,
                    dropped = ?unknown.iter().map(TaskId::as_str).collect::<Vec<_>>(),
                    "Dropping unknown dependencies"
                );
                for id in &unknown {
                    new_task.depends_on.remove(id);
                }
            }
        }
    }

    let unmet = unmet_in(new_task, &statuses);
    new_task.status = if unmet.is_empty() {
        TaskStatus::Pending
    } else {
        TaskStatus::Blocked
    };
    new_task.blocked_by.clone_from(&unmet);

    Ok(Admission {
        status: new_task.status,
        unmet,
        dropped: unknown,
    })
}

/// Cascade the completion of `completed_id` to its dependents.
///
/// `all` must already show `completed_id` as completed. Every blocked
/// dependent has its `blocked_by` refreshed; those left with nothing
/// outstanding move to pending. Returns the ids that were unblocked.
pub fn on_task_completed(
    completed_id: &TaskId,
    all: &mut [Task],
    now: DateTime<Utc>,
) -> Vec<TaskId> {
    let mut statuses: HashMap<TaskId, TaskStatus> =
        all.iter().map(|t| (t.id.clone(), t.status)).collect();
    statuses.insert(completed_id.clone(), TaskStatus::Completed);

    let mut unblocked = Vec::new();
    for task in all.iter_mut() {
        if task.status != TaskStatus::Blocked || !task.depends_on.contains(completed_id) {
            continue;
        }

        let unmet: BTreeSet<TaskId> = task
            .depends_on
            .iter()
            .filter(|dep| statuses.get(*dep) != Some(&TaskStatus::Completed))
            .cloned()
            .collect();

        task.blocked_by = unmet;
        task.updated_at = now;
        if task.blocked_by.is_empty() {
            task.status = TaskStatus::Pending;
            unblocked.push(task.id.clone());
        }
    }
    unblocked
}

/// Tasks that list `id` among their dependencies
pub fn dependents_of<'a>(id: &'a TaskId, all: &'a [Task]) -> impl Iterator<Item = &'a Task> + 'a {
    all.iter().filter(move |t| t.depends_on.contains(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;

    fn task(id: &str, deps: &[&str]) -> Task {
        let request = deps
            .iter()
            .fold(NewTask::new(id), |request, dep| request.with_dependency(TaskId::new(*dep)));
        Task::new(TaskId::new(id), request, Utc::now())
    }

    fn with_status(mut task: Task, status: TaskStatus) -> Task {
        task.status = status;
        task
    }

    #[test]
    fn test_no_dependencies_is_eligible() {
        assert!(is_eligible(&task("a", &[]), &[]));
    }

    #[test]
    fn test_eligibility_requires_all_completed() {
        let all = vec![
            with_status(task("a", &[]), TaskStatus::Completed),
            with_status(task("b", &[]), TaskStatus::InProgress),
        ];
        assert!(is_eligible(&task("c", &["a"]), &all));
        assert!(!is_eligible(&task("c", &["a", "b"]), &all));
        // a dependency that does not exist can never be satisfied
        assert!(!is_eligible(&task("c", &["zzz"]), &all));
    }

    #[test]
    fn test_created_with_open_dependency_is_blocked() -> Result<()> {
        let all = vec![task("a", &[])];
        let mut b = task("b", &["a"]);
        let admission = on_task_created(&mut b, &all, UnknownDependencyPolicy::Drop)?;

        assert_eq!(admission.status, TaskStatus::Blocked);
        assert_eq!(b.status, TaskStatus::Blocked);
        assert!(b.blocked_by.contains(&TaskId::new("a")));
        Ok(())
    }

    #[test]
    fn test_unknown_dependency_dropped() -> Result<()> {
        let all = vec![with_status(task("a", &[]), TaskStatus::Completed)];
        let mut b = task("b", &["a", "ghost"]);
        let admission = on_task_created(&mut b, &all, UnknownDependencyPolicy::Drop)?;

        assert_eq!(admission.dropped, vec![TaskId::new("ghost")]);
        assert_eq!(b.depends_on.len(), 1);
        assert_eq!(b.status, TaskStatus::Pending);
        Ok(())
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut b = task("b", &["ghost"]);
        let result = on_task_created(&mut b, &[], UnknownDependencyPolicy::Reject);
        assert!(matches!(result, Err(Error::InvalidDependency(ids)) if ids == vec![TaskId::new("ghost")]));
    }

    #[test]
    fn test_completion_unblocks_exactly_once() {
        let now = Utc::now();
        let mut all = vec![
            with_status(task("a", &[]), TaskStatus::Completed),
            with_status(task("b", &["a"]), TaskStatus::Blocked),
            with_status(task("c", &["a", "d"]), TaskStatus::Blocked),
            task("d", &[]),
        ];

        let unblocked = on_task_completed(&TaskId::new("a"), &mut all, now);
        assert_eq!(unblocked, vec![TaskId::new("b")]);
        assert_eq!(all[1].status, TaskStatus::Pending);
        assert!(all[1].blocked_by.is_empty());
        assert_eq!(all[2].status, TaskStatus::Blocked);
        assert_eq!(all[2].blocked_by, BTreeSet::from([TaskId::new("d")]));

        // Replaying the same completion changes nothing
        assert!(on_task_completed(&TaskId::new("a"), &mut all, now).is_empty());
    }

    #[test]
    fn test_cancelled_dependency_keeps_dependent_blocked() {
        let mut all = vec![
            with_status(task("a", &[]), TaskStatus::Cancelled),
            with_status(task("x", &[]), TaskStatus::Completed),
            with_status(task("b", &["a", "x"]), TaskStatus::Blocked),
        ];
        assert!(on_task_completed(&TaskId::new("x"), &mut all, Utc::now()).is_empty());
        assert_eq!(all[2].status, TaskStatus::Blocked);
    }

    #[test]
    fn test_dependents_of() {
        let all = vec![task("a", &[]), task("b", &["a"]), task("c", &[])];
        let id = TaskId::new("a");
        let ids: Vec<_> = dependents_of(&id, &all).map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }
}
