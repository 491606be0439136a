//! CLI command handlers that bridge between `clap` and the command modules

mod admin;
mod tasks;

use std::path::PathBuf;

use anyhow::Result;
use clap::ArgMatches;

use crate::commands::{self, CommandStatus};
use crate::output::OutputFormat;

/// Format an error for user display (no stack traces)
pub fn format_error(err: &anyhow::Error) -> String {
    err.chain()
        .map(ToString::to_string)
        .reduce(|msg, cause| {
            if msg.contains(&cause) {
                msg
            } else {
                format!("{msg}\nCause: {cause}")
            }
        })
        .unwrap_or_default()
}

pub async fn dispatch(matches: &ArgMatches) -> Result<CommandStatus> {
    let Some((name, sub_m)) = matches.subcommand() else {
        anyhow::bail!("Unknown command. Run 'backlog --help' for usage.");
    };

    let db = sub_m.get_one::<String>("db").map(PathBuf::from);
    let board = commands::open_board(db).await?;

    match name {
        "add" => tasks::handle_add(&board, sub_m).await,
        "list" => tasks::handle_list(&board, sub_m).await,
        "show" => tasks::handle_show(&board, sub_m).await,
        "next" => commands::tasks::run_next(&board, get_format(sub_m)).await,
        "schedule" => tasks::handle_schedule(&board, sub_m).await,
        "claim" => tasks::handle_claim(&board, sub_m).await,
        "complete" => tasks::handle_complete(&board, sub_m).await,
        "status" => tasks::handle_status(&board, sub_m).await,
        "cancel" => tasks::handle_cancel(&board, sub_m).await,
        "note" => tasks::handle_note(&board, sub_m).await,
        "assess" => admin::handle_assess(&board, sub_m).await,
        "trend" => commands::quality::run_trend(&board, get_format(sub_m)).await,
        "agent" => admin::handle_agent(&board, sub_m).await,
        "events" => admin::handle_events(&board, sub_m).await,
        "lock" => admin::handle_lock(&board, sub_m).await,
        other => anyhow::bail!("Unknown command '{other}'. Run 'backlog --help' for usage."),
    }
}

fn get_format(matches: &ArgMatches) -> OutputFormat {
    OutputFormat::from_json_flag(matches.get_flag("json"))
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| anyhow::anyhow!("Missing required argument <{name}>"))
}
