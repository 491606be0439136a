//! Backlog-core - shared task board for cooperating agent processes
//!
//! This crate provides:
//! - Durable task, agent, assessment and event records in `SQLite`
//! - A cross-process mutual exclusion lock with stale reclamation
//! - Dependency gating with cascade unblocking
//! - Priority scheduling with time-based aging
//! - Exclusive task claims through [`TaskBoard`]
//! - Weighted quality assessment and trend tracking

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod agent;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dependency;
pub mod error;
pub mod events;
pub mod lock;
pub mod quality;
pub mod scheduler;
pub mod store;
pub mod task;

pub use agent::{AgentId, AgentPerformance};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, load_config_from, BoardConfig};
pub use coordinator::{
    AssessOutcome, ClaimOutcome, CompleteOutcome, CreatedTask, QualityReport, TaskBoard,
    UpdateOutcome, BOARD_LOCK,
};
pub use dependency::UnknownDependencyPolicy;
pub use error::{Error, Result};
pub use events::{Event, EventKind, RecordedEvent};
pub use lock::{LockGuard, LockManager, LockOptions, LockStatus};
pub use quality::{AssessmentRecord, Dimension, Trend, TrendSummary};
pub use scheduler::{PriorityScheduler, ScheduledTask};
pub use store::{Changeset, Loaded, LockRecord, RecordStore, SqliteStore};
pub use task::{Complexity, NewTask, Note, Priority, Task, TaskId, TaskStatus};
