//! Agent statistics commands

use anyhow::Result;
use backlog_core::{AgentId, AgentPerformance, TaskBoard};

use super::tasks::warn_recovered;
use super::CommandStatus;
use crate::output::{print_json, OutputFormat};

pub async fn run_show(board: &TaskBoard, agent: &AgentId, format: OutputFormat) -> Result<CommandStatus> {
    let loaded = board.agent_metrics(agent).await?;
    warn_recovered(&loaded);
    let metrics = loaded.into_inner();

    if format.is_json() {
        print_json("agent", metrics.is_some(), &metrics)?;
    } else if let Some(metrics) = &metrics {
        print_agent(metrics);
    } else {
        println!("No statistics for agent {agent}");
    }
    Ok(CommandStatus::from_success(metrics.is_some()))
}

pub async fn run_list(board: &TaskBoard, format: OutputFormat) -> Result<CommandStatus> {
    let loaded = board.list_agents().await?;
    warn_recovered(&loaded);

    if format.is_json() {
        print_json("agents", true, loaded.value())?;
    } else if loaded.value().is_empty() {
        println!("No agents have claimed work yet");
    } else {
        println!("{:<20} {:>7} {:>9} {:>8}", "AGENT", "CLAIMED", "COMPLETED", "QUALITY");
        for agent in loaded.value() {
            println!(
                "{:<20} {:>7} {:>9} {:>8}",
                agent.agent_id.as_str(),
                agent.tasks_claimed,
                agent.tasks_completed,
                agent
                    .avg_quality
                    .map_or_else(|| "-".to_string(), |q| format!("{q:.2}"))
            );
        }
    }
    Ok(CommandStatus::Done)
}

fn print_agent(metrics: &AgentPerformance) {
    println!("Agent {}", metrics.agent_id);
    println!("  Claimed:      {}", metrics.tasks_claimed);
    println!("  Completed:    {}", metrics.tasks_completed);
    if let Some(avg) = metrics.avg_duration_secs {
        println!("  Avg duration: {:.1} min", avg / 60.0);
    }
    if let Some(quality) = metrics.avg_quality {
        println!(
            "  Avg quality:  {quality:.2} over {} assessments ({})",
            metrics.quality_scores.len(),
            metrics.quality_trend()
        );
    }
    println!("  First seen:   {}", metrics.first_seen.to_rfc3339());
    println!("  Last active:  {}", metrics.last_activity.to_rfc3339());
}
