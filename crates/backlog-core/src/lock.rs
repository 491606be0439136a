//! Cross-process mutual exclusion lock
//!
//! A cooperative, crash-recoverable lock keyed by resource name and stored
//! as a row in the record store:
//!
//! - Acquire inserts the lock row only if none exists.
//! - If the row is older than `stale_after` its holder is presumed dead; the
//!   row is removed (by token, so a fresh re-acquisition survives) and the
//!   insert is retried immediately.
//! - Otherwise the caller backs off exponentially, capped at
//!   `max_backoff`, until `timeout` elapses and [`Error::LockTimeout`] is
//!   returned.
//! - Release deletes the row only while the caller still owns it.
//!
//! The lock is advisory. Every mutation of task and agent rows in this
//! crate happens under it; a writer that skips it can still corrupt state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::LockConfig;
use crate::events::{Event, EventKind};
use crate::store::{LockRecord, Loaded, RecordStore};
use crate::{Error, Result};

/// Timing parameters for acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up after waiting this long
    pub timeout: Duration,
    /// A lock older than this is presumed abandoned
    pub stale_after: Duration,
    /// First retry delay
    pub initial_backoff: Duration,
    /// Retry delays never exceed this
    pub max_backoff: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for LockOptions {
    fn from(config: &LockConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            stale_after: Duration::from_millis(config.stale_after_ms),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl LockOptions {
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Delay before retry number `attempt` (zero-based), with up to 25% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff
            .saturating_mul(2_u32.saturating_pow(attempt.min(16)))
            .min(self.max_backoff);
        let jitter_ms = u64::try_from(base.as_millis() / 4).unwrap_or(0);
        if jitter_ms == 0 {
            return base;
        }
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        (base + jitter).min(self.max_backoff)
    }
}

/// Acquires and releases lock records in a [`RecordStore`]
#[derive(Debug, Clone)]
pub struct LockManager {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    options: LockOptions,
}

impl LockManager {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, options: LockOptions) -> Self {
        Self {
            store,
            clock,
            options,
        }
    }

    #[must_use]
    pub const fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Acquire `resource` for `owner_id`, waiting at most `timeout`.
    ///
    /// A held lock older than `stale_after` is reclaimed. Fails with
    /// [`Error::LockTimeout`] once the deadline passes.
    pub async fn acquire(
        &self,
        resource: &str,
        owner_id: &str,
        timeout: Duration,
        stale_after: Duration,
    ) -> Result<LockGuard> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let record = LockRecord::new(resource, owner_id, self.clock.now());
            if self.store.try_insert_lock(&record).await? {
                debug!(resource, owner_id, attempt, "Acquired lock");
                return Ok(LockGuard::new(Arc::clone(&self.store), record));
            }

            let retry_now = match self.store.read_lock(resource).await? {
                // Released between our insert and read
                None => true,
                Some(existing) => self.reclaim_if_stale(&existing, owner_id, stale_after).await?,
            };

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(Error::LockTimeout {
                    resource: resource.to_string(),
                    waited,
                });
            }

            if !retry_now {
                let delay = self.options.backoff(attempt).min(timeout - waited);
                debug!(resource, owner_id, attempt, ?delay, "Lock busy, backing off");
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }

    /// Acquire with this manager's configured timeout and staleness threshold
    pub async fn acquire_default(&self, resource: &str, owner_id: &str) -> Result<LockGuard> {
        self.acquire(
            resource,
            owner_id,
            self.options.timeout,
            self.options.stale_after,
        )
        .await
    }

    /// Remove the lock if `owner_id` holds it; a no-op otherwise
    pub async fn release(&self, resource: &str, owner_id: &str) -> Result<()> {
        if self.store.delete_lock_if_owner(resource, owner_id).await? {
            debug!(resource, owner_id, "Released lock");
        } else {
            debug!(resource, owner_id, "Release skipped, not the holder");
        }
        Ok(())
    }

    /// Every lock record with its age, judged against the configured threshold
    pub async fn status(&self) -> Result<Vec<LockStatus>> {
        let now = self.clock.now();
        let stale_after = self.options.stale_after;
        Ok(self
            .store
            .list_locks()
            .await?
            .into_iter()
            .map(|loaded| LockStatus::new(loaded, now, stale_after))
            .collect())
    }

    /// Remove every lock older than the configured threshold
    pub async fn sweep_stale(&self, swept_by: &str) -> Result<Vec<LockRecord>> {
        let mut removed = Vec::new();
        for loaded in self.store.list_locks().await? {
            if self
                .reclaim_if_stale(&loaded, swept_by, self.options.stale_after)
                .await?
            {
                removed.push(loaded.into_inner());
            }
        }
        Ok(removed)
    }

    /// Delete `existing` if it is stale or unreadable; true when it was removed
    async fn reclaim_if_stale(
        &self,
        existing: &Loaded<LockRecord>,
        reclaimer: &str,
        stale_after: Duration,
    ) -> Result<bool> {
        let record = existing.value();
        let age = age_of(record.acquired_at, self.clock.now());
        let stale = existing.is_recovered() || age > stale_after;
        if !stale {
            return Ok(false);
        }

        if !self
            .store
            .delete_lock_if_token(&record.resource, &record.token)
            .await?
        {
            // Someone else reclaimed or released it first
            return Ok(true);
        }

        warn!(
            resource = %record.resource,
            previous_owner = %record.owner_id,
            holder_pid = ?record.holder_pid,
            ?age,
            reason = existing.reason().unwrap_or("stale"),
            "Reclaimed abandoned lock"
        );

        let event = Event::new(EventKind::LockReclaimed, reclaimer, self.clock.now()).with_data(
            serde_json::json!({
                "resource": record.resource,
                "previous_owner": record.owner_id,
                "holder_pid": record.holder_pid,
                "age_ms": u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
            }),
        );
        self.store.append_event(event).await?;
        Ok(true)
    }
}

/// Age of a lock, zero if its timestamp is in the future
fn age_of(acquired_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - acquired_at).to_std().unwrap_or(Duration::ZERO)
}

/// A held lock; call [`LockGuard::release`] when done.
///
/// Dropping a guard without releasing leaves the record in place until it
/// goes stale.
#[derive(Debug)]
pub struct LockGuard {
    store: Arc<dyn RecordStore>,
    record: LockRecord,
    released: bool,
}

impl LockGuard {
    fn new(store: Arc<dyn RecordStore>, record: LockRecord) -> Self {
        Self {
            store,
            record,
            released: false,
        }
    }

    #[must_use]
    pub const fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Release the lock if this guard still owns it
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let removed = self
            .store
            .delete_lock_if_token(&self.record.resource, &self.record.token)
            .await?;
        if removed {
            debug!(resource = %self.record.resource, owner_id = %self.record.owner_id, "Released lock");
        } else {
            warn!(
                resource = %self.record.resource,
                owner_id = %self.record.owner_id,
                "Lock was reclaimed by another process before release"
            );
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                resource = %self.record.resource,
                owner_id = %self.record.owner_id,
                "Lock guard dropped without release; record stays until stale"
            );
        }
    }
}

/// Snapshot of one lock record
#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    pub record: LockRecord,
    pub age_ms: u64,
    pub stale: bool,
    /// Why the record could not be read cleanly, if it could not
    pub problem: Option<String>,
}

impl LockStatus {
    fn new(loaded: Loaded<LockRecord>, now: DateTime<Utc>, stale_after: Duration) -> Self {
        let problem = loaded.reason().map(str::to_string);
        let record = loaded.into_inner();
        let age = age_of(record.acquired_at, now);
        Self {
            age_ms: u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
            stale: problem.is_some() || age > stale_after,
            problem,
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::store::SqliteStore;

    fn fast_options() -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(200),
            stale_after: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        }
    }

    async fn manager(clock: Arc<dyn Clock>) -> Result<LockManager> {
        let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::in_memory().await?);
        Ok(LockManager::new(store, clock, fast_options()))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let options = LockOptions {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(1000),
            ..fast_options()
        };
        let first = options.backoff(0);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(12));
        let third = options.backoff(2);
        assert!(third >= Duration::from_millis(40) && third <= Duration::from_millis(50));
        assert_eq!(options.backoff(20), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_acquire_release_acquire() -> Result<()> {
        let locks = manager(Arc::new(SystemClock)).await?;
        let guard = locks.acquire_default("tasks", "a").await?;
        assert_eq!(guard.record().owner_id, "a");
        guard.release().await?;

        let again = locks.acquire_default("tasks", "b").await?;
        again.release().await
    }

    #[tokio::test]
    async fn test_held_lock_times_out() -> Result<()> {
        let locks = manager(Arc::new(SystemClock)).await?;
        let guard = locks.acquire_default("tasks", "a").await?;

        let result = locks
            .acquire("tasks", "b", Duration::from_millis(50), Duration::from_secs(30))
            .await;
        assert!(matches!(result, Err(Error::LockTimeout { .. })));

        guard.release().await
    }

    #[tokio::test]
    async fn test_release_by_non_owner_is_noop() -> Result<()> {
        let locks = manager(Arc::new(SystemClock)).await?;
        let guard = locks.acquire_default("tasks", "a").await?;

        locks.release("tasks", "intruder").await?;
        let status = locks.status().await?;
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].record.owner_id, "a");

        guard.release().await
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() -> Result<()> {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let locks = manager(clock.clone()).await?;

        // Holder "a" takes the lock and then disappears
        let abandoned = locks.acquire_default("tasks", "a").await?;
        std::mem::forget(abandoned);

        clock.advance(ChronoDuration::seconds(31));
        let guard = locks.acquire_default("tasks", "b").await?;
        assert_eq!(guard.record().owner_id, "b");

        // The old owner's release must not remove b's lock
        locks.release("tasks", "a").await?;
        assert_eq!(locks.status().await?[0].record.owner_id, "b");
        guard.release().await
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_locks() -> Result<()> {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let locks = manager(clock.clone()).await?;

        let old = locks.acquire_default("old", "a").await?;
        clock.advance(ChronoDuration::seconds(40));
        let fresh = locks.acquire_default("fresh", "b").await?;

        let swept = locks.sweep_stale("operator").await?;
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].resource, "old");

        let remaining = locks.status().await?;
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].stale);

        old.release().await?;
        fresh.release().await
    }
}
