//! Quality commands: assess and trend

use std::collections::BTreeMap;

use anyhow::Result;
use backlog_core::{AssessOutcome, Dimension, TaskBoard, TaskId, TrendSummary};

use super::CommandStatus;
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Clone)]
pub struct AssessOptions {
    pub id: TaskId,
    pub scores: BTreeMap<Dimension, f64>,
    pub lessons: Vec<String>,
    pub format: OutputFormat,
}

pub async fn run_assess(board: &TaskBoard, options: &AssessOptions) -> Result<CommandStatus> {
    let outcome = board
        .assess(&options.id, &options.scores, options.lessons.clone())
        .await?;
    let success = matches!(outcome, AssessOutcome::Assessed { .. });

    if options.format.is_json() {
        print_json("assess", success, &outcome)?;
    } else {
        match &outcome {
            AssessOutcome::Assessed { record } => {
                println!("Assessed {}: {:.1}", record.task_id, record.overall);
                for (dimension, score) in &record.scores {
                    let supplied = if options.scores.contains_key(dimension) {
                        ""
                    } else {
                        " (baseline)"
                    };
                    println!("  {:<14} {score:>4.1}{supplied}", dimension.to_string());
                }
                for lesson in &record.lessons_learned {
                    println!("  Lesson: {lesson}");
                }
            }
            AssessOutcome::NotFound => println!("Task {} not found", options.id),
            AssessOutcome::NotCompleted { status } => {
                println!("Task {} is {status}; only completed tasks can be assessed", options.id);
            }
        }
    }
    Ok(CommandStatus::from_success(success))
}

pub async fn run_trend(board: &TaskBoard, format: OutputFormat) -> Result<CommandStatus> {
    let report = board.quality_trend().await?;

    if format.is_json() {
        print_json("trend", true, &report)?;
    } else {
        println!("Overall: {}", describe(&report.overall));
        for (agent, summary) in &report.by_agent {
            println!("  {agent}: {}", describe(summary));
        }
    }
    Ok(CommandStatus::Done)
}

fn describe(summary: &TrendSummary) -> String {
    match (summary.older_mean, summary.recent_mean) {
        (Some(older), Some(recent)) => format!(
            "{} ({} samples, {older:.2} -> {recent:.2})",
            summary.trend, summary.samples
        ),
        _ => format!("{} ({} samples)", summary.trend, summary.samples),
    }
}
