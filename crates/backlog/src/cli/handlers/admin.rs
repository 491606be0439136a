//! Quality, agent, event and lock handlers

use anyhow::Result;
use backlog_core::{quality, AgentId, TaskBoard, TaskId};
use clap::ArgMatches;

use super::{get_format, required};
use crate::commands::{self, agents, events, locks, quality::AssessOptions, CommandStatus};

pub async fn handle_assess(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    let scores = quality::parse_scores(sub_m.get_many::<String>("score").into_iter().flatten())?;
    let lessons = sub_m
        .get_many::<String>("lesson")
        .into_iter()
        .flatten()
        .cloned()
        .collect();

    let options = AssessOptions {
        id: TaskId::new(required(sub_m, "id")?.trim()),
        scores,
        lessons,
        format: get_format(sub_m),
    };
    commands::quality::run_assess(board, &options).await
}

pub async fn handle_agent(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    match sub_m.subcommand() {
        Some(("show", show_m)) => {
            let agent = match show_m.get_one::<String>("id") {
                Some(id) => AgentId::new(id.trim()),
                None => commands::require_agent(show_m.get_one::<String>("agent"))?,
            };
            agents::run_show(board, &agent, get_format(show_m)).await
        }
        Some(("list", list_m)) => agents::run_list(board, get_format(list_m)).await,
        _ => anyhow::bail!("Unknown agent subcommand. Run 'backlog agent --help' for usage."),
    }
}

pub async fn handle_events(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    let since = sub_m.get_one::<i64>("since").copied().unwrap_or(0);
    let limit = sub_m.get_one::<usize>("limit").copied().unwrap_or(50);
    events::run(board, since, limit, get_format(sub_m)).await
}

pub async fn handle_lock(board: &TaskBoard, sub_m: &ArgMatches) -> Result<CommandStatus> {
    match sub_m.subcommand() {
        Some(("status", status_m)) => locks::run_status(board, get_format(status_m)).await,
        Some(("sweep", sweep_m)) => locks::run_sweep(board, get_format(sweep_m)).await,
        _ => anyhow::bail!("Unknown lock subcommand. Run 'backlog lock --help' for usage."),
    }
}
