//! Task handlers: add, list, show, schedule, claim, complete, status, cancel, note

use std::str::FromStr;

use anyhow::{Context, Result};
use backlog_core::{Complexity, NewTask, Priority, TaskBoard, TaskId, TaskStatus};
use clap::ArgMatches;

use super::{get_format, required};
use crate::commands::{self, tasks, CommandStatus};

fn task_id(sub_m: &ArgMatches) -> Result<TaskId> {
    required(sub_m, "id").map(|id| TaskId::new(id.trim()))
}

fn parse_status(raw: &str) -> Result<TaskStatus> {
    TaskStatus::from_str(raw).with_context(|| format!("Unknown status '{raw}'"))
}

pub async fn handle_add(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    let mut task = NewTask::new(required(sub_m, "title")?.clone());

    if let Some(description) = sub_m.get_one::<String>("description") {
        task = task.with_description(description.clone());
    }
    if let Some(priority) = sub_m.get_one::<String>("priority") {
        task = task.with_priority(
            Priority::from_str(priority).with_context(|| format!("Unknown priority '{priority}'"))?,
        );
    }
    if let Some(complexity) = sub_m.get_one::<String>("complexity") {
        task = task.with_complexity(
            Complexity::from_str(complexity)
                .with_context(|| format!("Unknown complexity '{complexity}'"))?,
        );
    }
    if let Some(hours) = sub_m.get_one::<f64>("estimate") {
        task = task.with_estimate(*hours);
    }
    task = sub_m
        .get_many::<String>("depends-on")
        .into_iter()
        .flatten()
        .fold(task, |task, dep| task.with_dependency(TaskId::new(dep.trim())));
    task = sub_m
        .get_many::<String>("tag")
        .into_iter()
        .flatten()
        .fold(task, |task, tag| task.with_tag(tag.clone()));

    let options = tasks::AddOptions {
        task,
        format: get_format(sub_m),
    };
    tasks::run_add(board, &options).await
}

pub async fn handle_list(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    let status = sub_m
        .get_one::<String>("status")
        .map(String::as_str)
        .map(parse_status)
        .transpose()?;
    tasks::run_list(board, status, get_format(sub_m)).await
}

pub async fn handle_show(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    tasks::run_show(board, &task_id(sub_m)?, get_format(sub_m)).await
}

pub async fn handle_schedule(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    let limit = sub_m.get_one::<usize>("limit").copied().unwrap_or(10);
    tasks::run_schedule(board, limit, get_format(sub_m)).await
}

pub async fn handle_claim(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    let agent = commands::require_agent(sub_m.get_one::<String>("agent"))?;
    tasks::run_claim(board, &task_id(sub_m)?, &agent, get_format(sub_m)).await
}

pub async fn handle_complete(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    let agent = commands::require_agent(sub_m.get_one::<String>("agent"))?;
    tasks::run_complete(board, &task_id(sub_m)?, &agent, get_format(sub_m)).await
}

pub async fn handle_status(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    let options = tasks::StatusOptions {
        id: task_id(sub_m)?,
        status: parse_status(required(sub_m, "status")?)?,
        note: sub_m.get_one::<String>("note").cloned(),
        format: get_format(sub_m),
    };
    tasks::run_status(board, &options).await
}

pub async fn handle_cancel(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    let reason = sub_m.get_one::<String>("reason").map(String::as_str);
    tasks::run_cancel(board, &task_id(sub_m)?, reason, get_format(sub_m)).await
}

pub async fn handle_note(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    let text = required(sub_m, "text")?;
    tasks::run_note(board, &task_id(sub_m)?, text, get_format(sub_m)).await
}
