//! `SQLite` implementation of [`RecordStore`]
//!
//! Tasks, agents and assessments are stored as validated JSON documents
//! next to a few indexed columns for read-only consumers. The event log
//! clamps each timestamp to the latest one already stored inside the
//! insert itself, so timestamps never go backwards across processes.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use super::{Changeset, LockRecord, Loaded, RecordStore};
use crate::agent::{AgentId, AgentPerformance};
use crate::events::{Event, EventKind, RecordedEvent};
use crate::quality::AssessmentRecord;
use crate::task::{Task, TaskId};
use crate::{Error, Result};

/// How long a connection waits on a write lock held by another process
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        priority_rank INTEGER NOT NULL,
        created_at_ms INTEGER NOT NULL,
        updated_at_ms INTEGER NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status)",
    "CREATE TABLE IF NOT EXISTS agents (
        agent_id TEXT PRIMARY KEY,
        data TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS assessments (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id TEXT NOT NULL,
        assessed_at_ms INTEGER NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT NOT NULL UNIQUE,
        emitted_by TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS locks (
        resource TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        token TEXT NOT NULL,
        acquired_at_ms INTEGER NOT NULL,
        holder_pid INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS quarantine (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_table TEXT NOT NULL,
        record_key TEXT NOT NULL,
        raw TEXT NOT NULL,
        reason TEXT NOT NULL,
        quarantined_at_ms INTEGER NOT NULL
    )",
];

/// Record store backed by a `SQLite` database shared between processes
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` in WAL mode
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::IoError(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database; one connection so every query sees the same data
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and create any missing tables
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Move an unreadable row out of its table, unless it changed meanwhile
    async fn quarantine(&self, table: &str, key_expr: &str, key: &str, raw: &str, reason: &str) -> Result<()> {
        let delete = format!("DELETE FROM {table} WHERE {key_expr} = ? AND data = ?");

        let mut tx = self.pool.begin().await?;
        let moved = sqlx::query(&delete)
            .bind(key.to_string())
            .bind(raw.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if moved > 0 {
            sqlx::query(
                "INSERT INTO quarantine (source_table, record_key, raw, reason, quarantined_at_ms)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(table.to_string())
            .bind(key.to_string())
            .bind(raw.to_string())
            .bind(reason.to_string())
            .bind(Utc::now().timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        warn!(table, key, reason, "Quarantined unreadable record");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn load_task(&self, id: &TaskId) -> Result<Loaded<Option<Task>>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM tasks WHERE id = ?")
            .bind(id.as_str().to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some((raw,)) = row else {
            return Ok(Loaded::Intact(None));
        };

        match decode_task(id.as_str(), &raw) {
            Ok(task) => Ok(Loaded::Intact(Some(task))),
            Err(reason) => {
                self.quarantine("tasks", "id", id.as_str(), &raw, &reason).await?;
                Ok(Loaded::Recovered { value: None, reason })
            }
        }
    }

    async fn load_tasks(&self) -> Result<Loaded<Vec<Task>>> {
        // rowid survives upserts, so this is creation order
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, data FROM tasks ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        let mut problems = Vec::new();
        for (id, raw) in rows {
            match decode_task(&id, &raw) {
                Ok(task) => tasks.push(task),
                Err(reason) => {
                    self.quarantine("tasks", "id", &id, &raw, &reason).await?;
                    problems.push(reason);
                }
            }
        }
        Ok(Loaded::from_problems(tasks, problems))
    }

    async fn load_agent(&self, id: &AgentId) -> Result<Loaded<Option<AgentPerformance>>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM agents WHERE agent_id = ?")
            .bind(id.as_str().to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some((raw,)) = row else {
            return Ok(Loaded::Intact(None));
        };

        match decode_agent(id.as_str(), &raw) {
            Ok(agent) => Ok(Loaded::Intact(Some(agent))),
            Err(reason) => {
                self.quarantine("agents", "agent_id", id.as_str(), &raw, &reason)
                    .await?;
                Ok(Loaded::Recovered { value: None, reason })
            }
        }
    }

    async fn load_agents(&self) -> Result<Loaded<Vec<AgentPerformance>>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT agent_id, data FROM agents ORDER BY agent_id")
                .fetch_all(&self.pool)
                .await?;

        let mut agents = Vec::with_capacity(rows.len());
        let mut problems = Vec::new();
        for (id, raw) in rows {
            match decode_agent(&id, &raw) {
                Ok(agent) => agents.push(agent),
                Err(reason) => {
                    self.quarantine("agents", "agent_id", &id, &raw, &reason).await?;
                    problems.push(reason);
                }
            }
        }
        Ok(Loaded::from_problems(agents, problems))
    }

    async fn load_assessments(&self) -> Result<Loaded<Vec<AssessmentRecord>>> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT seq, data FROM assessments ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        let mut problems = Vec::new();
        for (seq, raw) in rows {
            match decode::<AssessmentRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    let reason = format!("assessment #{seq}: {reason}");
                    self.quarantine("assessments", "CAST(seq AS TEXT)", &seq.to_string(), &raw, &reason)
                        .await?;
                    problems.push(reason);
                }
            }
        }
        Ok(Loaded::from_problems(records, problems))
    }

    async fn commit(&self, changes: Changeset) -> Result<Vec<RecordedEvent>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        for task in &changes.tasks {
            sqlx::query(
                "INSERT INTO tasks (id, status, priority_rank, created_at_ms, updated_at_ms, data)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    priority_rank = excluded.priority_rank,
                    updated_at_ms = excluded.updated_at_ms,
                    data = excluded.data",
            )
            .bind(task.id.as_str().to_string())
            .bind(task.status.to_string())
            .bind(i64::from(task.priority.base()))
            .bind(task.created_at.timestamp_millis())
            .bind(task.updated_at.timestamp_millis())
            .bind(serde_json::to_string(task)?)
            .execute(&mut *tx)
            .await?;
        }

        for agent in &changes.agents {
            sqlx::query(
                "INSERT INTO agents (agent_id, data) VALUES (?, ?)
                 ON CONFLICT(agent_id) DO UPDATE SET data = excluded.data",
            )
            .bind(agent.agent_id.as_str().to_string())
            .bind(serde_json::to_string(agent)?)
            .execute(&mut *tx)
            .await?;
        }

        for record in &changes.assessments {
            sqlx::query("INSERT INTO assessments (task_id, assessed_at_ms, data) VALUES (?, ?, ?)")
                .bind(record.task_id.as_str().to_string())
                .bind(record.assessed_at.timestamp_millis())
                .bind(serde_json::to_string(record)?)
                .execute(&mut *tx)
                .await?;
        }

        let mut recorded = Vec::with_capacity(changes.events.len());
        for event in changes.events {
            recorded.push(insert_event(&mut *tx, event).await?);
        }

        tx.commit().await?;
        Ok(recorded)
    }

    async fn append_event(&self, event: Event) -> Result<RecordedEvent> {
        insert_event(&self.pool, event).await
    }

    async fn events_since(&self, after: i64, limit: usize) -> Result<Loaded<Vec<RecordedEvent>>> {
        let rows: Vec<(i64, String, String, i64, String, String)> = sqlx::query_as(
            "SELECT seq, event_id, emitted_by, timestamp_ms, kind, payload
             FROM events WHERE seq > ? ORDER BY seq LIMIT ?",
        )
        .bind(after)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        let mut problems = Vec::new();
        for (seq, event_id, emitted_by, timestamp_ms, kind, payload) in rows {
            let decoded = EventKind::from_str(&kind)
                .map_err(|_| format!("unknown kind '{kind}'"))
                .and_then(|kind| {
                    let timestamp = from_millis(timestamp_ms)
                        .ok_or_else(|| format!("timestamp {timestamp_ms} out of range"))?;
                    let payload = serde_json::from_str(&payload)
                        .map_err(|e| format!("unparsable payload: {e}"))?;
                    Ok(Event {
                        event_id,
                        emitted_by,
                        timestamp,
                        kind,
                        payload,
                    })
                });
            match decoded {
                Ok(event) => events.push(RecordedEvent { seq, event }),
                Err(reason) => {
                    warn!(seq, %reason, "Skipping unreadable event");
                    problems.push(format!("event #{seq}: {reason}"));
                }
            }
        }
        Ok(Loaded::from_problems(events, problems))
    }

    async fn try_insert_lock(&self, record: &LockRecord) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO locks (resource, owner_id, token, acquired_at_ms, holder_pid)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(resource) DO NOTHING",
        )
        .bind(record.resource.clone())
        .bind(record.owner_id.clone())
        .bind(record.token.clone())
        .bind(record.acquired_at.timestamp_millis())
        .bind(record.holder_pid.map(i64::from))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn read_lock(&self, resource: &str) -> Result<Option<Loaded<LockRecord>>> {
        let row = sqlx::query(
            "SELECT resource, owner_id, token, acquired_at_ms, holder_pid FROM locks WHERE resource = ?",
        )
        .bind(resource.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_lock).transpose()
    }

    async fn delete_lock_if_token(&self, resource: &str, token: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM locks WHERE resource = ? AND token = ?")
            .bind(resource.to_string())
            .bind(token.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn delete_lock_if_owner(&self, resource: &str, owner_id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM locks WHERE resource = ? AND owner_id = ?")
            .bind(resource.to_string())
            .bind(owner_id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn list_locks(&self) -> Result<Vec<Loaded<LockRecord>>> {
        let rows = sqlx::query(
            "SELECT resource, owner_id, token, acquired_at_ms, holder_pid FROM locks ORDER BY resource",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_lock).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ROW DECODING
// ═══════════════════════════════════════════════════════════════════════════

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn decode<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, String> {
    serde_json::from_str(raw).map_err(|e| format!("unparsable record: {e}"))
}

fn decode_task(key: &str, raw: &str) -> std::result::Result<Task, String> {
    let task: Task = decode(raw).map_err(|e| format!("task {key}: {e}"))?;
    if task.id.as_str() != key {
        return Err(format!("task row {key} holds record for {}", task.id));
    }
    task.validate()?;
    Ok(task)
}

fn decode_agent(key: &str, raw: &str) -> std::result::Result<AgentPerformance, String> {
    let agent: AgentPerformance = decode(raw).map_err(|e| format!("agent {key}: {e}"))?;
    if agent.agent_id.as_str() != key {
        return Err(format!("agent row {key} holds record for {}", agent.agent_id));
    }
    agent.validate()?;
    Ok(agent)
}

fn decode_lock(row: &SqliteRow) -> Result<Loaded<LockRecord>> {
    let resource: String = row.try_get("resource")?;
    let owner_id: String = row.try_get("owner_id")?;
    let token: String = row.try_get("token")?;
    let holder_pid = row
        .try_get::<Option<i64>, _>("holder_pid")
        .ok()
        .flatten()
        .and_then(|pid| u32::try_from(pid).ok());

    let acquired_at = row
        .try_get::<i64, _>("acquired_at_ms")
        .map_err(|e| e.to_string())
        .and_then(|ms| from_millis(ms).ok_or_else(|| format!("acquired_at {ms} out of range")));

    Ok(match acquired_at {
        Ok(acquired_at) => Loaded::Intact(LockRecord {
            resource,
            owner_id,
            token,
            acquired_at,
            holder_pid,
        }),
        Err(reason) => Loaded::Recovered {
            reason: format!("lock on '{resource}' has unreadable acquired_at: {reason}"),
            value: LockRecord {
                resource,
                owner_id,
                token,
                acquired_at: DateTime::<Utc>::UNIX_EPOCH,
                holder_pid,
            },
        },
    })
}

async fn insert_event<'e, E>(executor: E, event: Event) -> Result<RecordedEvent>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let payload = serde_json::to_string(&event.payload)?;
    let (seq, timestamp_ms): (i64, i64) = sqlx::query_as(
        "INSERT INTO events (event_id, emitted_by, timestamp_ms, kind, payload)
         VALUES (?, ?, MAX(?, COALESCE((SELECT MAX(timestamp_ms) FROM events), 0)), ?, ?)
         RETURNING seq, timestamp_ms",
    )
    .bind(event.event_id.clone())
    .bind(event.emitted_by.clone())
    .bind(event.timestamp.timestamp_millis())
    .bind(event.kind.to_string())
    .bind(payload)
    .fetch_one(executor)
    .await?;

    let mut event = event;
    if let Some(stored) = from_millis(timestamp_ms) {
        event.timestamp = stored;
    }
    Ok(RecordedEvent { seq, event })
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::task::NewTask;

    async fn store() -> Result<SqliteStore> {
        SqliteStore::in_memory().await
    }

    fn task(id: &str, now: DateTime<Utc>) -> Task {
        Task::new(TaskId::new(id), NewTask::new(format!("task {id}")), now)
    }

    #[tokio::test]
    async fn test_commit_then_load_tasks_in_creation_order() -> Result<()> {
        let store = store().await?;
        let now = Utc::now();

        let mut changes = Changeset::new();
        changes.put_task(task("t-b", now));
        changes.put_task(task("t-a", now));
        store.commit(changes).await?;

        let loaded = store.load_tasks().await?;
        assert!(!loaded.is_recovered());
        let ids: Vec<_> = loaded.value().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t-b", "t-a"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_task_is_quarantined() -> Result<()> {
        let store = store().await?;
        sqlx::query(
            "INSERT INTO tasks (id, status, priority_rank, created_at_ms, updated_at_ms, data)
             VALUES ('t-bad', 'pending', 2, 0, 0, '{not json')",
        )
        .execute(store.pool())
        .await?;

        let loaded = store.load_task(&TaskId::new("t-bad")).await?;
        assert!(loaded.is_recovered());
        assert_eq!(loaded.value(), &None);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM quarantine WHERE record_key = 't-bad'")
            .fetch_one(store.pool())
            .await?;
        assert_eq!(count, 1);

        // The row is gone, so a second read is clean
        assert_eq!(store.load_task(&TaskId::new("t-bad")).await?, Loaded::Intact(None));
        Ok(())
    }

    #[tokio::test]
    async fn test_task_failing_validation_is_quarantined() -> Result<()> {
        let store = store().await?;
        let mut bad = task("t-1", Utc::now());
        bad.status = crate::task::TaskStatus::InProgress;
        sqlx::query(
            "INSERT INTO tasks (id, status, priority_rank, created_at_ms, updated_at_ms, data)
             VALUES ('t-1', 'in_progress', 2, 0, 0, ?)",
        )
        .bind(serde_json::to_string(&bad)?)
        .execute(store.pool())
        .await?;

        let loaded = store.load_tasks().await?;
        assert!(loaded.is_recovered());
        assert!(loaded.value().is_empty());
        assert!(loaded.reason().is_some_and(|r| r.contains("no assignee")));
        Ok(())
    }

    #[tokio::test]
    async fn test_event_timestamps_never_go_backwards() -> Result<()> {
        let store = store().await?;
        let now = Utc::now();

        let first = store
            .append_event(Event::new(EventKind::TaskCreated, "w1", now))
            .await?;
        let second = store
            .append_event(Event::new(EventKind::TaskCreated, "w2", now - ChronoDuration::seconds(30)))
            .await?;

        assert!(second.seq > first.seq);
        assert!(second.event.timestamp >= first.event.timestamp);

        let tail = store.events_since(first.seq, 10).await?.into_inner();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event.emitted_by, "w2");
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_insert_is_exclusive() -> Result<()> {
        let store = store().await?;
        let now = Utc::now();
        let first = LockRecord::new("tasks", "a", now);
        let second = LockRecord::new("tasks", "b", now);

        assert!(store.try_insert_lock(&first).await?);
        assert!(!store.try_insert_lock(&second).await?);

        // Only the holder can release; only the current token can be reclaimed
        assert!(!store.delete_lock_if_owner("tasks", "b").await?);
        assert!(!store.delete_lock_if_token("tasks", &second.token).await?);
        assert!(store.delete_lock_if_owner("tasks", "a").await?);
        assert!(store.read_lock("tasks").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_lock_timestamp_recovers_as_epoch() -> Result<()> {
        let store = store().await?;
        sqlx::query(
            "INSERT INTO locks (resource, owner_id, token, acquired_at_ms, holder_pid)
             VALUES ('tasks', 'ghost', 'tok', 'yesterday', NULL)",
        )
        .execute(store.pool())
        .await?;

        let Some(loaded) = store.read_lock("tasks").await? else {
            return Err(Error::DatabaseError("lock row missing".into()));
        };
        assert!(loaded.is_recovered());
        assert_eq!(loaded.value().acquired_at, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(loaded.value().owner_id, "ghost");
        Ok(())
    }
}
