//! Append-only event log entries
//!
//! Consumers tail the log by sequence number; events are never mutated
//! or deleted by the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::task::TaskId;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    /// Task became pending and can be claimed
    TaskAvailable,
    TaskBlocked,
    /// Last outstanding dependency completed
    TaskUnblocked,
    TaskClaimed,
    TaskCompleted,
    TaskCancelled,
    StatusChanged,
    NoteAdded,
    QualityAssessed,
    /// A stale lock was removed by a later acquirer
    LockReclaimed,
}

/// An event before it is appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    /// Agent or process that caused the event
    pub emitted_by: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl Event {
    /// Create a new event with an empty payload
    #[must_use]
    pub fn new(kind: EventKind, emitted_by: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            emitted_by: emitted_by.into(),
            timestamp,
            kind,
            payload: serde_json::Value::Null,
        }
    }

    /// Event about a single task; the payload carries `task_id`
    #[must_use]
    pub fn for_task(
        kind: EventKind,
        task_id: &TaskId,
        emitted_by: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(kind, emitted_by, timestamp)
            .with_data(serde_json::json!({ "task_id": task_id.as_str() }))
    }

    /// Merge `data` into the payload; object keys are added, anything else replaces it
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        match (&mut self.payload, data) {
            (serde_json::Value::Object(existing), serde_json::Value::Object(extra)) => {
                existing.extend(extra);
            }
            (payload, data) => *payload = data,
        }
        self
    }
}

/// An event as stored, with its position in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub seq: i64,
    #[serde(flatten)]
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() -> Result<(), serde_json::Error> {
        assert_eq!(EventKind::TaskClaimed.to_string(), "task_claimed");
        assert_eq!(
            serde_json::to_string(&EventKind::QualityAssessed)?,
            "\"quality_assessed\""
        );
        Ok(())
    }

    #[test]
    fn test_with_data_merges_into_task_payload() {
        let event = Event::for_task(EventKind::TaskClaimed, &TaskId::new("t-1"), "w1", Utc::now())
            .with_data(serde_json::json!({ "agent_id": "w1" }));

        assert_eq!(event.payload["task_id"], "t-1");
        assert_eq!(event.payload["agent_id"], "w1");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let now = Utc::now();
        let a = Event::new(EventKind::TaskCreated, "w1", now);
        let b = Event::new(EventKind::TaskCreated, "w1", now);
        assert_ne!(a.event_id, b.event_id);
    }
}
