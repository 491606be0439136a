//! Task commands: add, list, show, next, schedule, claim, complete, status,
//! cancel and note

use anyhow::Result;
use backlog_core::{
    AgentId, ClaimOutcome, CompleteOutcome, Loaded, NewTask, Task, TaskBoard, TaskId, TaskStatus,
    UpdateOutcome,
};
use itertools::Itertools;
use serde::Serialize;

use super::{task_line, CommandStatus};
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Clone)]
pub struct AddOptions {
    pub task: NewTask,
    pub format: OutputFormat,
}

pub async fn run_add(board: &TaskBoard, options: &AddOptions) -> Result<CommandStatus> {
    let created = board.create_task(options.task.clone()).await?;

    if options.format.is_json() {
        print_json("add", true, &created)?;
    } else {
        println!("Created {} [{}]", created.task.id, created.task.status);
        if !created.task.blocked_by.is_empty() {
            println!("  Blocked by: {}", created.task.blocked_by.iter().join(", "));
        }
        if !created.dropped_dependencies.is_empty() {
            println!(
                "  Dropped unknown dependencies: {}",
                created.dropped_dependencies.iter().join(", ")
            );
        }
    }
    Ok(CommandStatus::Done)
}

/// List output; `recovered` carries the reason when some rows were unreadable
#[derive(Debug, Serialize)]
struct TaskList<'a> {
    tasks: &'a [Task],
    #[serde(skip_serializing_if = "Option::is_none")]
    recovered: Option<&'a str>,
}

pub async fn run_list(
    board: &TaskBoard,
    status: Option<TaskStatus>,
    format: OutputFormat,
) -> Result<CommandStatus> {
    let loaded = board.list_tasks(status).await?;
    warn_recovered(&loaded);

    if format.is_json() {
        let list = TaskList {
            tasks: loaded.value(),
            recovered: loaded.reason(),
        };
        print_json("list", true, list)?;
    } else if loaded.value().is_empty() {
        println!("No tasks");
    } else {
        for task in loaded.value() {
            println!("{}", task_line(task));
        }
    }
    Ok(CommandStatus::Done)
}

pub async fn run_show(board: &TaskBoard, id: &TaskId, format: OutputFormat) -> Result<CommandStatus> {
    let loaded = board.get_task(id).await?;
    warn_recovered(&loaded);
    let task = loaded.into_inner();

    if format.is_json() {
        print_json("show", task.is_some(), &task)?;
    } else if let Some(task) = &task {
        print_task(task);
    } else {
        println!("Task {id} not found");
    }
    Ok(CommandStatus::from_success(task.is_some()))
}

pub async fn run_next(board: &TaskBoard, format: OutputFormat) -> Result<CommandStatus> {
    let next = board.next().await?;

    if format.is_json() {
        print_json("next", true, &next)?;
    } else if let Some(task) = &next {
        println!("{}", task_line(task));
    } else {
        println!("No claimable tasks");
    }
    Ok(CommandStatus::Done)
}

pub async fn run_schedule(board: &TaskBoard, limit: usize, format: OutputFormat) -> Result<CommandStatus> {
    let plan = board.schedule(limit).await?;

    if format.is_json() {
        print_json("schedule", true, &plan)?;
    } else if plan.is_empty() {
        println!("No claimable tasks");
    } else {
        println!("{:<6} {:<9} {:<8} TASK", "SCORE", "EFFECTIVE", "WAITING");
        for entry in &plan {
            println!(
                "{:<6.2} {:<9.2} {:<8} {}",
                entry.urgency_score,
                entry.effective_priority,
                format!("{:.1}h", entry.hours_waiting),
                task_line(&entry.task)
            );
        }
    }
    Ok(CommandStatus::Done)
}

pub async fn run_claim(
    board: &TaskBoard,
    id: &TaskId,
    agent: &AgentId,
    format: OutputFormat,
) -> Result<CommandStatus> {
    let outcome = board.claim(id, agent).await?;
    let success = matches!(outcome, ClaimOutcome::Claimed { .. });

    if format.is_json() {
        print_json("claim", success, &outcome)?;
    } else {
        match &outcome {
            ClaimOutcome::Claimed { task } => println!("Claimed {} for {agent}: {}", task.id, task.title),
            ClaimOutcome::AlreadyClaimed { owner } => println!("Task {id} is already claimed by {owner}"),
            ClaimOutcome::AlreadyCompleted => println!("Task {id} is already completed"),
            ClaimOutcome::NotFound => println!("Task {id} not found"),
            ClaimOutcome::Ineligible { status } => println!("Task {id} cannot be claimed while {status}"),
        }
    }
    Ok(CommandStatus::from_success(success))
}

pub async fn run_complete(
    board: &TaskBoard,
    id: &TaskId,
    agent: &AgentId,
    format: OutputFormat,
) -> Result<CommandStatus> {
    let outcome = board.complete(id, agent).await?;
    let success = matches!(outcome, CompleteOutcome::Completed { .. });

    if format.is_json() {
        print_json("complete", success, &outcome)?;
    } else {
        match &outcome {
            CompleteOutcome::Completed { task, unblocked } => {
                println!("Completed {}: {}", task.id, task.title);
                if !unblocked.is_empty() {
                    println!("  Unblocked: {}", unblocked.iter().join(", "));
                }
            }
            CompleteOutcome::AlreadyCompleted => println!("Task {id} is already completed"),
            CompleteOutcome::NotFound => println!("Task {id} not found"),
            CompleteOutcome::NotOwner { owner } => println!("Task {id} is claimed by {owner}, not {agent}"),
            CompleteOutcome::NotClaimed { status } => {
                println!("Task {id} is {status}; claim it before completing");
            }
        }
    }
    Ok(CommandStatus::from_success(success))
}

#[derive(Debug, Clone)]
pub struct StatusOptions {
    pub id: TaskId,
    pub status: TaskStatus,
    pub note: Option<String>,
    pub format: OutputFormat,
}

pub async fn run_status(board: &TaskBoard, options: &StatusOptions) -> Result<CommandStatus> {
    let outcome = board
        .update_status(&options.id, options.status, options.note.as_deref())
        .await?;
    report_update("status", &options.id, &outcome, options.format)
}

pub async fn run_cancel(
    board: &TaskBoard,
    id: &TaskId,
    reason: Option<&str>,
    format: OutputFormat,
) -> Result<CommandStatus> {
    let outcome = board.cancel(id, reason).await?;
    report_update("cancel", id, &outcome, format)
}

pub async fn run_note(board: &TaskBoard, id: &TaskId, text: &str, format: OutputFormat) -> Result<CommandStatus> {
    let outcome = board.add_note(id, text).await?;
    report_update("note", id, &outcome, format)
}

fn report_update(kind: &str, id: &TaskId, outcome: &UpdateOutcome, format: OutputFormat) -> Result<CommandStatus> {
    let success = matches!(outcome, UpdateOutcome::Updated { .. });

    if format.is_json() {
        print_json(kind, success, outcome)?;
    } else {
        match outcome {
            UpdateOutcome::Updated { task, unblocked } => {
                println!("{}", task_line(task));
                if !unblocked.is_empty() {
                    println!("  Unblocked: {}", unblocked.iter().join(", "));
                }
            }
            UpdateOutcome::NotFound => println!("Task {id} not found"),
            UpdateOutcome::InvalidTransition { from, to } => {
                println!("Task {id} cannot move from {from} to {to}");
            }
        }
    }
    Ok(CommandStatus::from_success(success))
}

fn print_task(task: &Task) {
    println!("{} {}", task.id, task.title);
    println!("  Status:     {}", task.status);
    println!("  Priority:   {}", task.priority);
    println!("  Complexity: {}", task.complexity);
    if let Some(hours) = task.estimated_hours {
        println!("  Estimate:   {hours}h");
    }
    if let Some(agent) = &task.assigned_to {
        println!("  Assigned:   {agent}");
    }
    if !task.depends_on.is_empty() {
        println!("  Depends on: {}", task.depends_on.iter().join(", "));
    }
    if !task.blocked_by.is_empty() {
        println!("  Blocked by: {}", task.blocked_by.iter().join(", "));
    }
    if !task.tags.is_empty() {
        println!("  Tags:       {}", task.tags.iter().join(", "));
    }
    println!("  Created:    {}", task.created_at.to_rfc3339());
    if let Some(at) = task.claimed_at {
        println!("  Claimed:    {}", at.to_rfc3339());
    }
    if let Some(at) = task.completed_at {
        println!("  Completed:  {}", at.to_rfc3339());
    }
    if let Some(score) = task.quality_score {
        println!("  Quality:    {score:.1}");
    }
    if !task.description.is_empty() {
        println!();
        println!("{}", task.description);
    }
    for note in &task.notes {
        println!("  [{}] {}", note.at.format("%Y-%m-%d %H:%M"), note.text);
    }
}

pub(crate) fn warn_recovered<T>(loaded: &Loaded<T>) {
    if let Some(reason) = loaded.reason() {
        tracing::warn!(%reason, "Some records were unreadable and have been quarantined");
    }
}
