//! Migration history tracking.
//!
//! The history table records which migrations have been applied, when, and
//! with what checksum. Two companion tables sit next to it: `<history>_lock`
//! holds the single-writer lock row and `<history>_inflight` holds the marker
//! written before a migration runs outside a transaction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::FromRow;

use crate::error::{MigrateError, Result};

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct AppliedMigration {
    /// Migration id.
    pub migration_id: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
    /// Checksum of the descriptor at the time it was applied.
    pub checksum: String,
}

/// Marker left while a migration runs without transactional DDL.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct InflightMarker {
    /// Migration id.
    pub migration_id: String,
    /// `up` or `down`.
    pub direction: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

/// Manages the migration history in the database.
#[derive(Debug, Clone)]
pub struct MigrationHistory {
    pool: SqlitePool,
    table: String,
}

impl MigrationHistory {
    /// Creates a new migration history manager over `table`.
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    /// History table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Lock table name.
    #[must_use]
    pub fn lock_table(&self) -> String {
        format!("{}_lock", self.table)
    }

    /// In-flight marker table name.
    #[must_use]
    pub fn inflight_table(&self) -> String {
        format!("{}_inflight", self.table)
    }

    /// Tables owned by the history store, excluded from introspection.
    #[must_use]
    pub fn owned_tables(&self) -> Vec<String> {
        vec![self.table.clone(), self.lock_table(), self.inflight_table()]
    }

    /// Ensures the history, lock and marker tables exist.
    pub async fn ensure_tables(&self) -> Result<()> {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (\
                 migration_id TEXT PRIMARY KEY NOT NULL, \
                 applied_at TIMESTAMP NOT NULL, \
                 checksum TEXT NOT NULL)",
                self.table
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (\
                 id INTEGER PRIMARY KEY CHECK (id = 1), \
                 owner TEXT NOT NULL, \
                 acquired_at TIMESTAMP NOT NULL)",
                self.lock_table()
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (\
                 migration_id TEXT PRIMARY KEY NOT NULL, \
                 direction TEXT NOT NULL, \
                 started_at TIMESTAMP NOT NULL)",
                self.inflight_table()
            ),
        ];
        for sql in &statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Gets all applied migrations, in id order.
    pub async fn get_applied(&self) -> Result<Vec<AppliedMigration>> {
        let sql = format!(
            "SELECT migration_id, applied_at, checksum FROM \"{}\" ORDER BY migration_id",
            self.table
        );
        Ok(sqlx::query_as::<_, AppliedMigration>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Id of the most recently applied migration.
    pub async fn current_version(&self) -> Result<Option<String>> {
        let sql = format!(
            "SELECT migration_id FROM \"{}\" ORDER BY migration_id DESC LIMIT 1",
            self.table
        );
        let row: Option<(String,)> = sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        Ok(row.map(|(id,)| id))
    }

    /// Checks if a migration has been applied.
    pub async fn is_applied(&self, migration_id: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM \"{}\" WHERE migration_id = ?", self.table);
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(migration_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Records a migration as applied, on the migration's own connection.
    pub async fn record_applied(
        &self,
        conn: &mut SqliteConnection,
        migration_id: &str,
        checksum: &str,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO \"{}\" (migration_id, applied_at, checksum) VALUES (?, ?, ?)",
            self.table
        );
        sqlx::query(&sql)
            .bind(migration_id)
            .bind(Utc::now())
            .bind(checksum)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Removes a migration record (for rollback).
    pub async fn record_unapplied(
        &self,
        conn: &mut SqliteConnection,
        migration_id: &str,
    ) -> Result<()> {
        let sql = format!("DELETE FROM \"{}\" WHERE migration_id = ?", self.table);
        let result = sqlx::query(&sql).bind(migration_id).execute(conn).await?;

        if result.rows_affected() == 0 {
            return Err(MigrateError::HistoryDesynchronized(format!(
                "no history entry for '{}' to remove",
                migration_id
            )));
        }
        Ok(())
    }

    /// Writes the in-flight marker for a migration about to run.
    pub async fn mark_inflight(
        &self,
        conn: &mut SqliteConnection,
        migration_id: &str,
        direction: &str,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO \"{}\" (migration_id, direction, started_at) VALUES (?, ?, ?)",
            self.inflight_table()
        );
        sqlx::query(&sql)
            .bind(migration_id)
            .bind(direction)
            .bind(Utc::now())
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Clears the in-flight marker of a migration.
    pub async fn clear_inflight(
        &self,
        conn: &mut SqliteConnection,
        migration_id: &str,
    ) -> Result<()> {
        let sql = format!(
            "DELETE FROM \"{}\" WHERE migration_id = ?",
            self.inflight_table()
        );
        sqlx::query(&sql).bind(migration_id).execute(conn).await?;
        Ok(())
    }

    /// Returns the in-flight marker, if a previous run left one behind.
    pub async fn get_inflight(&self) -> Result<Option<InflightMarker>> {
        let sql = format!(
            "SELECT migration_id, direction, started_at FROM \"{}\" ORDER BY started_at LIMIT 1",
            self.inflight_table()
        );
        Ok(sqlx::query_as::<_, InflightMarker>(&sql)
            .fetch_optional(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    async fn history() -> MigrationHistory {
        let history = MigrationHistory::new(create_test_pool().await, "cask_migrations");
        history.ensure_tables().await.unwrap();
        history
    }

    #[tokio::test]
    async fn test_ensure_tables_is_idempotent() {
        let history = history().await;
        history.ensure_tables().await.unwrap();
        assert_eq!(
            history.owned_tables(),
            vec![
                "cask_migrations",
                "cask_migrations_lock",
                "cask_migrations_inflight"
            ]
        );
    }

    #[tokio::test]
    async fn test_record_and_check_applied() {
        let history = history().await;
        assert!(!history.is_applied("0001_Init").await.unwrap());
        assert_eq!(history.current_version().await.unwrap(), None);

        let mut conn = history.pool.acquire().await.unwrap();
        history
            .record_applied(&mut conn, "0002_AddFoo", "bbb")
            .await
            .unwrap();
        history
            .record_applied(&mut conn, "0001_Init", "aaa")
            .await
            .unwrap();
        drop(conn);

        assert!(history.is_applied("0001_Init").await.unwrap());
        assert_eq!(
            history.current_version().await.unwrap().as_deref(),
            Some("0002_AddFoo")
        );

        let applied = history.get_applied().await.unwrap();
        let ids: Vec<_> = applied.iter().map(|a| a.migration_id.as_str()).collect();
        assert_eq!(ids, vec!["0001_Init", "0002_AddFoo"]);
        assert_eq!(applied[0].checksum, "aaa");
    }

    #[tokio::test]
    async fn test_record_unapplied() {
        let history = history().await;
        let mut conn = history.pool.acquire().await.unwrap();
        history
            .record_applied(&mut conn, "0001_Init", "aaa")
            .await
            .unwrap();
        history
            .record_unapplied(&mut conn, "0001_Init")
            .await
            .unwrap();

        let missing = history.record_unapplied(&mut conn, "0001_Init").await;
        assert!(matches!(
            missing,
            Err(MigrateError::HistoryDesynchronized(_))
        ));
        drop(conn);

        assert!(!history.is_applied("0001_Init").await.unwrap());
    }

    #[tokio::test]
    async fn test_inflight_marker() {
        let history = history().await;
        assert!(history.get_inflight().await.unwrap().is_none());

        let mut conn = history.pool.acquire().await.unwrap();
        history
            .mark_inflight(&mut conn, "0003_Rebuild", "up")
            .await
            .unwrap();
        drop(conn);

        let marker = history.get_inflight().await.unwrap().unwrap();
        assert_eq!(marker.migration_id, "0003_Rebuild");
        assert_eq!(marker.direction, "up");

        let mut conn = history.pool.acquire().await.unwrap();
        history
            .clear_inflight(&mut conn, "0003_Rebuild")
            .await
            .unwrap();
        drop(conn);
        assert!(history.get_inflight().await.unwrap().is_none());
    }
}
