//! Idempotent reference-data seeding.
//!
//! A [`SeedPlan`] is an ordered list of steps. Upsert batches match records
//! on a natural key and insert the ones that are absent; raw steps run a
//! single statement, typically a narrow cleanup. Every step commits on its
//! own, so a batch that intentionally repeats a natural key gets
//! deterministic surrogate ids before the cleanup removes the extras.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Connection;
use tracing::{debug, info};

use crate::error::{MigrateError, Result};

/// A single column value in a seed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeedValue {
    /// NULL.
    Null,
    /// Boolean, stored as 0/1.
    Bool(bool),
    /// Integer.
    Integer(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl From<&str> for SeedValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SeedValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SeedValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for SeedValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for SeedValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Column values of one seed row.
pub type SeedRecord = BTreeMap<String, SeedValue>;

/// Records for one table, matched on a natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedBatch {
    /// Target table.
    pub table: String,
    /// Columns identifying a row.
    pub natural_key: Vec<String>,
    /// Rows to ensure.
    pub records: Vec<SeedRecord>,
    /// Update non-key columns of matched rows when they differ.
    #[serde(default)]
    pub update_existing: bool,
}

impl SeedBatch {
    /// Creates an empty batch for `table` keyed on `natural_key`.
    pub fn new(table: impl Into<String>, natural_key: &[&str]) -> Self {
        Self {
            table: table.into(),
            natural_key: natural_key.iter().map(|s| (*s).to_string()).collect(),
            records: Vec::new(),
            update_existing: false,
        }
    }

    /// Adds a record.
    #[must_use]
    pub fn record<K, V>(mut self, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<SeedValue>,
    {
        self.records.push(
            values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Makes matched rows follow the record's non-key values.
    #[must_use]
    pub fn update_existing(mut self) -> Self {
        self.update_existing = true;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.natural_key.is_empty() {
            return Err(MigrateError::Validation(format!(
                "Seed batch for '{}' has no natural key",
                self.table
            )));
        }
        for (i, record) in self.records.iter().enumerate() {
            if let Some(missing) = self.natural_key.iter().find(|k| !record.contains_key(*k)) {
                return Err(MigrateError::Validation(format!(
                    "Seed record {} for '{}' is missing natural key column '{}'",
                    i, self.table, missing
                )));
            }
        }
        Ok(())
    }
}

/// One step of a seed plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SeedStep {
    /// Natural-key upsert of a batch.
    Upsert(SeedBatch),
    /// A single raw statement.
    ExecuteRaw {
        /// The statement.
        sql: String,
    },
}

/// Ordered seed steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedPlan {
    /// Steps in execution order.
    pub steps: Vec<SeedStep>,
}

impl SeedPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an upsert batch.
    #[must_use]
    pub fn upsert(mut self, batch: SeedBatch) -> Self {
        self.steps.push(SeedStep::Upsert(batch));
        self
    }

    /// Appends a raw statement.
    #[must_use]
    pub fn execute_raw(mut self, sql: impl Into<String>) -> Self {
        self.steps.push(SeedStep::ExecuteRaw { sql: sql.into() });
        self
    }

    /// Checks every batch before anything is written.
    pub fn validate(&self) -> Result<()> {
        for step in &self.steps {
            if let SeedStep::Upsert(batch) = step {
                batch.validate()?;
            }
        }
        Ok(())
    }
}

/// Row counts from a seed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Records inserted.
    pub inserted: u64,
    /// Matched rows whose values were changed.
    pub updated: u64,
    /// Matched records left as they were.
    pub unchanged: u64,
    /// Rows affected by raw steps.
    pub raw_rows_affected: u64,
}

/// Runs seed plans.
#[derive(Debug, Clone)]
pub struct SeedExecutor {
    pool: SqlitePool,
}

impl SeedExecutor {
    /// Creates an executor over `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Runs every step of `plan`, each in its own transaction.
    pub async fn run(&self, plan: &SeedPlan) -> Result<SeedReport> {
        plan.validate()?;
        let mut report = SeedReport::default();
        let mut conn = self.pool.acquire().await?;

        for step in &plan.steps {
            let mut tx = conn.begin().await?;
            match step {
                SeedStep::Upsert(batch) => upsert_batch(&mut tx, batch, &mut report).await?,
                SeedStep::ExecuteRaw { sql } => {
                    debug!(sql = %sql, "Executing SQL");
                    report.raw_rows_affected +=
                        sqlx::query(sql).execute(&mut *tx).await?.rows_affected();
                }
            }
            tx.commit().await?;
        }

        info!(
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            raw_rows_affected = report.raw_rows_affected,
            "Seeding complete"
        );
        Ok(report)
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Binds a seed value to a raw query.
fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: SeedValue,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        SeedValue::Null => query.bind(Option::<i64>::None),
        SeedValue::Bool(b) => query.bind(b),
        SeedValue::Integer(i) => query.bind(i),
        SeedValue::Float(f) => query.bind(f),
        SeedValue::Text(s) => query.bind(s),
        SeedValue::Blob(b) => query.bind(b),
    }
}

fn key_filter(batch: &SeedBatch) -> String {
    batch
        .natural_key
        .iter()
        .map(|k| format!("{} IS ?", quote(k)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

async fn upsert_batch(
    conn: &mut SqliteConnection,
    batch: &SeedBatch,
    report: &mut SeedReport,
) -> Result<()> {
    let table = quote(&batch.table);
    let filter = key_filter(batch);

    // Every lookup sees the table as it was before this batch.
    let lookup = format!("SELECT 1 FROM {} WHERE {} LIMIT 1", table, filter);
    let mut existing = Vec::with_capacity(batch.records.len());
    for record in &batch.records {
        let mut query = sqlx::query(&lookup);
        for key in &batch.natural_key {
            query = bind_value(query, record[key].clone());
        }
        existing.push(query.fetch_optional(&mut *conn).await?.is_some());
    }

    for (record, exists) in batch.records.iter().zip(existing) {
        if !exists {
            let columns: Vec<String> = record.keys().map(|c| quote(c)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            );
            let mut query = sqlx::query(&sql);
            for value in record.values() {
                query = bind_value(query, value.clone());
            }
            query.execute(&mut *conn).await?;
            report.inserted += 1;
            continue;
        }

        let changes: Vec<(&String, &SeedValue)> = record
            .iter()
            .filter(|(column, _)| !batch.natural_key.contains(*column))
            .collect();
        if !batch.update_existing || changes.is_empty() {
            report.unchanged += 1;
            continue;
        }

        let assignments: Vec<String> = changes
            .iter()
            .map(|(c, _)| format!("{} = ?", quote(c)))
            .collect();
        let same: Vec<String> = changes
            .iter()
            .map(|(c, _)| format!("{} IS ?", quote(c)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} AND NOT ({})",
            table,
            assignments.join(", "),
            filter,
            same.join(" AND ")
        );
        let mut query = sqlx::query(&sql);
        for (_, value) in &changes {
            query = bind_value(query, (*value).clone());
        }
        for key in &batch.natural_key {
            query = bind_value(query, record[key].clone());
        }
        for (_, value) in &changes {
            query = bind_value(query, (*value).clone());
        }
        if query.execute(&mut *conn).await?.rows_affected() > 0 {
            report.updated += 1;
        } else {
            report.unchanged += 1;
        }
    }

    debug!(table = %batch.table, records = batch.records.len(), "Seeded batch");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        sqlx::query(
            "CREATE TABLE \"Barrel\" (\
             \"Id\" INTEGER NOT NULL CONSTRAINT \"PK_Barrel\" PRIMARY KEY AUTOINCREMENT, \
             \"Code\" TEXT NOT NULL, \"Wood\" TEXT, \"Charred\" INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    async fn rows(pool: &SqlitePool) -> Vec<(i64, String, Option<String>)> {
        sqlx::query_as("SELECT \"Id\", \"Code\", \"Wood\" FROM \"Barrel\" ORDER BY \"Id\"")
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[test]
    fn test_seed_plan_deserialization() {
        let plan: SeedPlan = serde_json::from_str(
            r#"{"steps": [
                {"step": "upsert", "table": "Barrel", "natural_key": ["Code"],
                 "records": [{"Code": "B1", "Wood": "Oak", "Charred": true, "Note": null}]},
                {"step": "execute_raw", "sql": "DELETE FROM \"Barrel\" WHERE \"Id\" = 9"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(plan.steps.len(), 2);
        let SeedStep::Upsert(batch) = &plan.steps[0] else {
            panic!("Expected upsert step");
        };
        assert!(!batch.update_existing);
        assert_eq!(batch.records[0]["Charred"], SeedValue::Bool(true));
        assert_eq!(batch.records[0]["Note"], SeedValue::Null);
    }

    #[tokio::test]
    async fn test_missing_natural_key_is_rejected() {
        let pool = create_test_pool().await;
        let plan = SeedPlan::new().upsert(
            SeedBatch::new("Barrel", &["Code"]).record([("Wood", "Oak")]),
        );

        let result = SeedExecutor::new(pool.clone()).run(&plan).await;
        assert!(matches!(result, Err(MigrateError::Validation(_))));
        assert!(rows(&pool).await.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_inserts_once() {
        let pool = create_test_pool().await;
        let plan = SeedPlan::new().upsert(
            SeedBatch::new("Barrel", &["Code"])
                .record([("Code", "B1"), ("Wood", "Oak")])
                .record([("Code", "B2"), ("Wood", "Sherry")]),
        );
        let executor = SeedExecutor::new(pool.clone());

        let first = executor.run(&plan).await.unwrap();
        assert_eq!(first.inserted, 2);

        let second = executor.run(&plan).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(rows(&pool).await.len(), 2);
    }

    #[tokio::test]
    async fn test_update_existing_only_touches_differences() {
        let pool = create_test_pool().await;
        let executor = SeedExecutor::new(pool.clone());
        executor
            .run(&SeedPlan::new().upsert(
                SeedBatch::new("Barrel", &["Code"])
                    .record([("Code", "B1"), ("Wood", "Oak")])
                    .record([("Code", "B2"), ("Wood", "Oak")]),
            ))
            .await
            .unwrap();

        let report = executor
            .run(&SeedPlan::new().upsert(
                SeedBatch::new("Barrel", &["Code"])
                    .record([("Code", "B1"), ("Wood", "Oak")])
                    .record([("Code", "B2"), ("Wood", "Port")])
                    .update_existing(),
            ))
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(
            rows(&pool).await,
            vec![
                (1, "B1".to_string(), Some("Oak".to_string())),
                (2, "B2".to_string(), Some("Port".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_colliding_records_are_all_inserted_in_order() {
        let pool = create_test_pool().await;
        let plan = SeedPlan::new()
            .upsert(
                SeedBatch::new("Barrel", &["Code"])
                    .record([("Code", "B1")])
                    .record([("Code", "B1")])
                    .record([("Code", "B2")]),
            )
            .execute_raw("DELETE FROM \"Barrel\" WHERE \"Id\" IN (2)");
        let executor = SeedExecutor::new(pool.clone());

        let first = executor.run(&plan).await.unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.raw_rows_affected, 1);

        let second = executor.run(&plan).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.raw_rows_affected, 0);

        let codes: Vec<(i64, String)> = rows(&pool)
            .await
            .into_iter()
            .map(|(id, code, _)| (id, code))
            .collect();
        assert_eq!(codes, vec![(1, "B1".to_string()), (3, "B2".to_string())]);
    }
}
