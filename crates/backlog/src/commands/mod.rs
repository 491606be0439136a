//! Command implementations
//!
//! Each command takes an open [`TaskBoard`] plus its options, prints its
//! result in the requested format and reports whether the operation
//! succeeded or hit a typed refusal.

pub mod agents;
pub mod events;
pub mod locks;
pub mod quality;
pub mod tasks;

use std::path::PathBuf;

use anyhow::{Context, Result};
use backlog_core::{load_config, AgentId, Task, TaskBoard};

/// How a command finished when it did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Done,
    /// Typed non-success such as "already claimed" or "not found"
    Rejected,
}

impl CommandStatus {
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Done => 0,
            Self::Rejected => 2,
        }
    }

    #[must_use]
    pub const fn from_success(success: bool) -> Self {
        if success {
            Self::Done
        } else {
            Self::Rejected
        }
    }
}

/// Load layered configuration, apply `--db`, and open the shared board
pub async fn open_board(db: Option<PathBuf>) -> Result<TaskBoard> {
    let mut config = load_config().await.context("Failed to load configuration")?;
    if let Some(path) = db {
        config.store.path = path;
    }
    TaskBoard::open(&config)
        .await
        .with_context(|| format!("Failed to open backlog at {}", config.store.path.display()))
}

pub fn require_agent(agent: Option<&String>) -> Result<AgentId> {
    agent
        .filter(|id| !id.trim().is_empty())
        .map(|id| AgentId::new(id.trim()))
        .ok_or_else(|| {
            anyhow::anyhow!("No agent ID provided. Set BACKLOG_AGENT_ID or use --agent")
        })
}

/// One-line summary used by list-style output
pub(crate) fn task_line(task: &Task) -> String {
    let owner = task
        .assigned_to
        .as_ref()
        .map(|agent| format!(" @{agent}"))
        .unwrap_or_default();
    format!(
        "{:<16} {:<11} {:<8} {}{owner}",
        task.id.as_str(),
        task.status.to_string(),
        task.priority.to_string(),
        task.title
    )
}
