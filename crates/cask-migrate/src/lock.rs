//! Single-writer lock over the history store.
//!
//! The lock is one row (`id = 1`) in `<history>_lock`. Acquiring inserts the
//! row; releasing deletes it. Anyone else polls until the row is gone or the
//! timeout expires.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};

/// A held migration lock.
///
/// Call [`HistoryLock::release`] when done; a lock that is dropped without
/// being released stays in the table until `unlock` removes it.
#[derive(Debug)]
pub struct HistoryLock {
    pool: SqlitePool,
    table: String,
    owner: String,
}

impl HistoryLock {
    /// Polls for the lock row until it is ours or `timeout` expires.
    pub async fn acquire(
        pool: &SqlitePool,
        table: &str,
        owner: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let sql = format!(
            "INSERT OR IGNORE INTO \"{}\" (id, owner, acquired_at) VALUES (1, ?, ?)",
            table
        );
        let started = Instant::now();

        loop {
            let inserted = sqlx::query(&sql)
                .bind(owner)
                .bind(Utc::now())
                .execute(pool)
                .await?
                .rows_affected();
            if inserted == 1 {
                debug!(owner = %owner, "Acquired migration lock");
                return Ok(Self {
                    pool: pool.clone(),
                    table: table.to_string(),
                    owner: owner.to_string(),
                });
            }

            let waited = started.elapsed();
            if waited >= timeout {
                let holder = Self::holder(pool, table)
                    .await?
                    .map_or_else(|| "unknown".to_string(), |(owner, _)| owner);
                return Err(MigrateError::LockTimeout {
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                    holder,
                });
            }
            tokio::time::sleep(poll_interval.min(timeout - waited)).await;
        }
    }

    /// Owner token of this lock.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Releases the lock if it is still ours.
    pub async fn release(self) -> Result<()> {
        let sql = format!("DELETE FROM \"{}\" WHERE id = 1 AND owner = ?", self.table);
        let removed = sqlx::query(&sql)
            .bind(&self.owner)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed == 0 {
            warn!(owner = %self.owner, "Migration lock was already gone when releasing");
        } else {
            debug!(owner = %self.owner, "Released migration lock");
        }
        Ok(())
    }

    /// Current holder and acquisition time, if the lock is taken.
    pub async fn holder(
        pool: &SqlitePool,
        table: &str,
    ) -> Result<Option<(String, DateTime<Utc>)>> {
        let sql = format!("SELECT owner, acquired_at FROM \"{}\" WHERE id = 1", table);
        Ok(sqlx::query_as(&sql).fetch_optional(pool).await?)
    }

    /// Removes the lock row whoever holds it. Returns the removed owner.
    pub async fn force_release(pool: &SqlitePool, table: &str) -> Result<Option<String>> {
        let holder = Self::holder(pool, table).await?;
        let sql = format!("DELETE FROM \"{}\" WHERE id = 1", table);
        sqlx::query(&sql).execute(pool).await?;
        Ok(holder.map(|(owner, _)| owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MigrationHistory;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn lock_table() -> (SqlitePool, String) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        let history = MigrationHistory::new(pool.clone(), "cask_migrations");
        history.ensure_tables().await.unwrap();
        (pool, history.lock_table())
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (pool, table) = lock_table().await;
        let lock = HistoryLock::acquire(
            &pool,
            &table,
            "runner-a",
            Duration::from_millis(50),
            Duration::from_millis(5),
        )
        .await
        .unwrap();
        assert_eq!(lock.owner(), "runner-a");

        let (holder, _) = HistoryLock::holder(&pool, &table).await.unwrap().unwrap();
        assert_eq!(holder, "runner-a");

        lock.release().await.unwrap();
        assert!(HistoryLock::holder(&pool, &table).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contention_times_out() {
        let (pool, table) = lock_table().await;
        let held = HistoryLock::acquire(
            &pool,
            &table,
            "runner-a",
            Duration::from_millis(50),
            Duration::from_millis(5),
        )
        .await
        .unwrap();

        let result = HistoryLock::acquire(
            &pool,
            &table,
            "runner-b",
            Duration::from_millis(30),
            Duration::from_millis(5),
        )
        .await;
        match result {
            Err(MigrateError::LockTimeout { holder, waited_ms }) => {
                assert_eq!(holder, "runner-a");
                assert!(waited_ms >= 30);
            }
            other => panic!("Expected LockTimeout, got {:?}", other),
        }

        held.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_force_release() {
        let (pool, table) = lock_table().await;
        let _stale = HistoryLock::acquire(
            &pool,
            &table,
            "crashed-runner",
            Duration::from_millis(50),
            Duration::from_millis(5),
        )
        .await
        .unwrap();

        let removed = HistoryLock::force_release(&pool, &table).await.unwrap();
        assert_eq!(removed.as_deref(), Some("crashed-runner"));
        assert!(HistoryLock::force_release(&pool, &table)
            .await
            .unwrap()
            .is_none());
    }
}
