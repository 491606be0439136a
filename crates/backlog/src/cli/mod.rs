pub mod handlers;

use clap::{Arg, ArgAction, Command};

const PRIORITIES: [&str; 4] = ["critical", "high", "medium", "low"];
const COMPLEXITIES: [&str; 5] = ["trivial", "simple", "moderate", "complex", "epic"];
const STATUSES: [&str; 5] = ["pending", "blocked", "in_progress", "completed", "cancelled"];

pub fn build_cli() -> Command {
    Command::new("backlog")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Shared task backlog for cooperating agent processes")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("db")
                .long("db")
                .global(true)
                .value_name("PATH")
                .env("BACKLOG_DB")
                .help("Database file shared by every agent"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Output as JSON"),
        )
        .arg(
            Arg::new("agent")
                .long("agent")
                .global(true)
                .value_name("ID")
                .env("BACKLOG_AGENT_ID")
                .help("Agent identity for claim and complete"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::Count)
                .help("Log debug output to stderr (repeat for trace)"),
        )
        .subcommand(cmd_add())
        .subcommand(cmd_list())
        .subcommand(task_arg(Command::new("show").about("Show one task")))
        .subcommand(Command::new("next").about("Show the task to work on next"))
        .subcommand(cmd_schedule())
        .subcommand(task_arg(Command::new("claim").about("Claim a task for --agent")))
        .subcommand(task_arg(
            Command::new("complete").about("Complete a task claimed by --agent"),
        ))
        .subcommand(cmd_status())
        .subcommand(cmd_cancel())
        .subcommand(cmd_note())
        .subcommand(cmd_assess())
        .subcommand(cmd_agent())
        .subcommand(Command::new("trend").about("Show the quality trend"))
        .subcommand(cmd_events())
        .subcommand(cmd_lock())
}

fn task_arg(cmd: Command) -> Command {
    cmd.arg(Arg::new("id").required(true).help("Task ID"))
}

fn cmd_add() -> Command {
    Command::new("add")
        .about("Add a task to the backlog")
        .arg(Arg::new("title").required(true).help("Short task title"))
        .arg(
            Arg::new("description")
                .long("description")
                .short('d')
                .help("Longer description"),
        )
        .arg(
            Arg::new("priority")
                .long("priority")
                .short('p')
                .value_parser(PRIORITIES)
                .default_value("medium"),
        )
        .arg(
            Arg::new("depends-on")
                .long("depends-on")
                .value_name("ID")
                .action(ArgAction::Append)
                .help("Task that must complete first (repeatable)"),
        )
        .arg(
            Arg::new("tag")
                .long("tag")
                .action(ArgAction::Append)
                .help("Free-form tag (repeatable)"),
        )
        .arg(
            Arg::new("complexity")
                .long("complexity")
                .value_parser(COMPLEXITIES)
                .default_value("moderate"),
        )
        .arg(
            Arg::new("estimate")
                .long("estimate")
                .value_name("HOURS")
                .value_parser(clap::value_parser!(f64))
                .help("Estimated effort in hours"),
        )
}

fn cmd_list() -> Command {
    Command::new("list")
        .about("List tasks by priority")
        .arg(
            Arg::new("status")
                .long("status")
                .short('s')
                .value_parser(STATUSES)
                .help("Only tasks in this status"),
        )
}

fn cmd_schedule() -> Command {
    Command::new("schedule")
        .about("Rank claimable tasks for planning")
        .arg(
            Arg::new("limit")
                .long("limit")
                .short('n')
                .value_parser(clap::value_parser!(usize))
                .default_value("10"),
        )
}

fn cmd_status() -> Command {
    task_arg(Command::new("status").about("Move a task to completed or cancelled"))
        .arg(
            Arg::new("status")
                .required(true)
                .value_parser(STATUSES)
                .help("New status"),
        )
        .arg(Arg::new("note").long("note").help("Note to attach"))
}

fn cmd_cancel() -> Command {
    task_arg(Command::new("cancel").about("Cancel a task")).arg(
        Arg::new("reason")
            .long("reason")
            .short('r')
            .help("Why the task was cancelled"),
    )
}

fn cmd_note() -> Command {
    task_arg(Command::new("note").about("Attach a note to a task"))
        .arg(Arg::new("text").required(true).help("Note text"))
}

fn cmd_assess() -> Command {
    task_arg(Command::new("assess").about("Record a quality assessment for a completed task"))
        .arg(
            Arg::new("score")
                .long("score")
                .value_name("DIMENSION=SCORE")
                .action(ArgAction::Append)
                .help(
                    "Score from 1 to 10 for completeness, code_quality, documentation, \
                     efficiency or impact (repeatable)",
                ),
        )
        .arg(
            Arg::new("lesson")
                .long("lesson")
                .action(ArgAction::Append)
                .help("Lesson learned (repeatable)"),
        )
}

fn cmd_agent() -> Command {
    Command::new("agent")
        .about("Agent performance statistics")
        .subcommand_required(true)
        .subcommand(
            Command::new("show")
                .about("Show one agent (defaults to --agent)")
                .arg(Arg::new("id").help("Agent ID")),
        )
        .subcommand(Command::new("list").about("List every agent"))
}

fn cmd_events() -> Command {
    Command::new("events")
        .about("Read the event log")
        .arg(
            Arg::new("since")
                .long("since")
                .value_name("SEQ")
                .value_parser(clap::value_parser!(i64))
                .default_value("0")
                .help("Only events after this sequence number"),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .short('n')
                .value_parser(clap::value_parser!(usize))
                .default_value("50"),
        )
}

fn cmd_lock() -> Command {
    Command::new("lock")
        .about("Inspect the coordination lock")
        .subcommand_required(true)
        .subcommand(Command::new("status").about("Show held locks and their age"))
        .subcommand(Command::new("sweep").about("Remove stale locks"))
}
