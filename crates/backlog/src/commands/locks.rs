//! Lock inspection and stale-lock sweeping

use anyhow::Result;
use backlog_core::TaskBoard;

use super::CommandStatus;
use crate::output::{print_json, OutputFormat};

pub async fn run_status(board: &TaskBoard, format: OutputFormat) -> Result<CommandStatus> {
    let locks = board.lock_status().await?;

    if format.is_json() {
        print_json("lock-status", true, &locks)?;
    } else if locks.is_empty() {
        println!("No locks held");
    } else {
        for lock in &locks {
            let pid = lock
                .record
                .holder_pid
                .map_or_else(|| "?".to_string(), |pid| pid.to_string());
            println!(
                "{} held by {} (pid {pid}) for {:.1}s{}",
                lock.record.resource,
                lock.record.owner_id,
                lock.age_ms as f64 / 1000.0,
                if lock.stale { " [stale]" } else { "" }
            );
            if let Some(problem) = &lock.problem {
                println!("  unreadable: {problem}");
            }
        }
    }
    Ok(CommandStatus::Done)
}

pub async fn run_sweep(board: &TaskBoard, format: OutputFormat) -> Result<CommandStatus> {
    let swept = board.sweep_stale_locks().await?;

    if format.is_json() {
        print_json("lock-sweep", true, &swept)?;
    } else if swept.is_empty() {
        println!("No stale locks");
    } else {
        for record in &swept {
            println!("Removed stale lock {} held by {}", record.resource, record.owner_id);
        }
    }
    Ok(CommandStatus::Done)
}
