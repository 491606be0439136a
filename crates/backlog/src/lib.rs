//! Backlog - shared task board for cooperating agent processes
//!
//! Command-line front end over `backlog-core`. Every invocation opens the
//! shared database, performs one operation under the board lock and exits.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod output;
