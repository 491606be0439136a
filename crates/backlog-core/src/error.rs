//! Error types for backlog-core
//!
//! Only conditions the caller cannot branch on as a normal outcome live here.
//! Claim conflicts, missing tasks and rejected transitions are returned as
//! typed outcomes by [`crate::TaskBoard`]; corrupt rows come back as
//! [`crate::Loaded::Recovered`].

use std::time::Duration;

use itertools::Itertools;
use thiserror::Error;

use crate::task::TaskId;

/// Core error type for backlog operations
#[derive(Debug, Error)]
pub enum Error {
    /// Store I/O failed; the operation did not take effect
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The coordination lock was not acquired before the deadline
    #[error("Timed out after {waited:?} waiting for lock on '{resource}'")]
    LockTimeout {
        /// Resource key that stayed locked
        resource: String,
        /// How long the caller waited
        waited: Duration,
    },

    /// Dependencies that do not exist, under the `reject` policy
    #[error("Unknown dependencies: {}", join_ids(.0))]
    InvalidDependency(Vec<TaskId>),

    /// Caller supplied a value outside its domain
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A record could not be encoded for storage
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration could not be loaded or failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem errors outside the store
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type alias for backlog-core operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter().map(TaskId::as_str).join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_dependency_lists_ids() {
        let err = Error::InvalidDependency(vec![TaskId::new("t-1"), TaskId::new("t-2")]);
        assert_eq!(err.to_string(), "Unknown dependencies: t-1, t-2");
    }

    #[test]
    fn test_lock_timeout_names_resource() {
        let err = Error::LockTimeout {
            resource: "tasks".to_string(),
            waited: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("'tasks'"));
    }
}
