use anyhow::Result;
use backlog_core::TaskBoard;

use super::tasks::warn_recovered;
use super::CommandStatus;
use crate::output::{print_json, OutputFormat};

pub async fn run(board: &TaskBoard, since: i64, limit: usize, format: OutputFormat) -> Result<CommandStatus> {
    let loaded = board.events_since(since, limit).await?;
    warn_recovered(&loaded);

    if format.is_json() {
        print_json("events", true, loaded.value())?;
    } else if loaded.value().is_empty() {
        println!("No events after #{since}");
    } else {
        for recorded in loaded.value() {
            let event = &recorded.event;
            println!(
                "#{:<5} {} {:<16} {:<20} {}",
                recorded.seq,
                event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                event.kind.to_string(),
                event.emitted_by,
                event.payload
            );
        }
    }
    Ok(CommandStatus::Done)
}
