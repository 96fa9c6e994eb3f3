//! Migration runner.
//!
//! Applies and reverts descriptors against a database under the history
//! lock, one transaction per descriptor, and keeps the history store in step
//! with the schema.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Connection;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::descriptor::{MigrationDescriptor, MigrationSet};
use crate::dialect::{MigrationDialect, Unsupported};
use crate::error::{MigrateError, Result};
use crate::history::{AppliedMigration, InflightMarker, MigrationHistory};
use crate::introspect::introspect;
use crate::lock::HistoryLock;
use crate::operations::MigrationOperation;
use crate::schema::{DatabaseSchema, TableSchema};
use crate::seed::{SeedExecutor, SeedPlan, SeedReport};
use crate::state::SchemaState;

/// Which list of a descriptor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Run `up`.
    Up,
    /// Run `down`.
    Down,
}

impl Direction {
    /// Name stored in the in-flight marker.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target that reverts every applied migration.
pub const REVERT_ALL: &str = "0";

/// What a `migrate_up` or `migrate_down` run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    /// Ids applied, in order.
    pub applied: Vec<String>,
    /// Ids reverted, in order.
    pub reverted: Vec<String>,
    /// Whether the history was empty when the run started.
    pub first_time_setup: bool,
    /// Seeding result, when seeding ran.
    pub seed: Option<SeedReport>,
}

/// Snapshot of the history store against the descriptor list.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Latest applied id.
    pub current_version: Option<String>,
    /// History entries in id order.
    pub applied: Vec<AppliedMigration>,
    /// Ids not yet applied, in order.
    pub pending: Vec<String>,
    /// Applied ids whose descriptor checksum no longer matches.
    pub changed: Vec<String>,
    /// Applied ids missing from the descriptor list.
    pub unknown: Vec<String>,
    /// Marker of an interrupted run.
    pub inflight: Option<InflightMarker>,
    /// Owner of the migration lock, if held.
    pub lock_holder: Option<String>,
}

/// Statements a pending descriptor would issue.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationScript {
    /// Descriptor id.
    pub migration: String,
    /// Which list was rendered.
    pub direction: Direction,
    /// Statements in execution order.
    pub statements: Vec<String>,
}

impl fmt::Display for MigrationScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-- {} ({})", self.migration, self.direction)?;
        for sql in &self.statements {
            writeln!(f, "{};", sql)?;
        }
        Ok(())
    }
}

/// Applies and reverts migrations.
pub struct MigrationRunner<D: MigrationDialect> {
    pool: SqlitePool,
    dialect: D,
    history: MigrationHistory,
    config: RunnerConfig,
    seed_plan: Option<SeedPlan>,
    cancel: Arc<AtomicBool>,
}

impl<D: MigrationDialect> MigrationRunner<D> {
    /// Creates a runner with the default configuration.
    pub fn new(pool: SqlitePool, dialect: D) -> Self {
        let config = RunnerConfig::default();
        let history = MigrationHistory::new(pool.clone(), config.history_table.clone());
        Self {
            pool,
            dialect,
            history,
            config,
            seed_plan: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.history = MigrationHistory::new(self.pool.clone(), config.history_table.clone());
        self.config = config;
        self
    }

    /// Seeds with `plan` after a first-time `migrate_up`.
    #[must_use]
    pub fn with_seed_plan(mut self, plan: SeedPlan) -> Self {
        self.seed_plan = Some(plan);
        self
    }

    /// Shares a cancellation flag, checked before each descriptor.
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// The cancellation flag.
    #[must_use]
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The history store.
    #[must_use]
    pub fn history(&self) -> &MigrationHistory {
        &self.history
    }

    /// The dialect.
    #[must_use]
    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    /// Ensures the history tables exist.
    pub async fn init(&self) -> Result<()> {
        self.config.validate()?;
        self.history.ensure_tables().await
    }

    /// Id of the most recently applied migration.
    pub async fn current_version(&self) -> Result<Option<String>> {
        self.init().await?;
        self.history.current_version().await
    }

    /// Descriptors a run in `direction` would process, in execution order.
    pub async fn pending<'s>(
        &self,
        set: &'s MigrationSet,
        direction: Direction,
        target: Option<&str>,
    ) -> Result<Vec<&'s MigrationDescriptor>> {
        self.init().await?;
        let applied = self.history.get_applied().await?;
        self.check_consistency(set, &applied).await?;
        plan_pending(set, applied.len(), direction, target)
    }

    /// Applies `migration`, which must be the next one in `set`.
    pub async fn apply(&self, set: &MigrationSet, migration: &MigrationDescriptor) -> Result<()> {
        self.init().await?;
        let lock = self.acquire_lock().await?;
        let result = self.apply_locked(set, migration).await;
        finish(lock, result).await
    }

    async fn apply_locked(&self, set: &MigrationSet, migration: &MigrationDescriptor) -> Result<()> {
        let applied = self.history.get_applied().await?;
        self.check_consistency(set, &applied).await?;

        let id = migration.id().as_str();
        let position = set
            .position(id)
            .ok_or_else(|| MigrateError::UnknownMigration(id.to_string()))?;
        if position < applied.len() {
            return Err(MigrateError::OutOfOrderMigration {
                migration: id.to_string(),
                reason: "already applied".to_string(),
            });
        }
        if position > applied.len() {
            let next = set.at(applied.len()).map_or("", |m| m.id().as_str());
            return Err(MigrateError::OutOfOrderMigration {
                migration: id.to_string(),
                reason: format!("'{}' must be applied first", next),
            });
        }
        self.run_one(migration, Direction::Up).await
    }

    /// Reverts `migration`, which must be the latest applied one.
    pub async fn revert(&self, set: &MigrationSet, migration: &MigrationDescriptor) -> Result<()> {
        self.init().await?;
        let lock = self.acquire_lock().await?;
        let result = self.revert_locked(set, migration).await;
        finish(lock, result).await
    }

    async fn revert_locked(
        &self,
        set: &MigrationSet,
        migration: &MigrationDescriptor,
    ) -> Result<()> {
        let applied = self.history.get_applied().await?;
        self.check_consistency(set, &applied).await?;

        let id = migration.id().as_str();
        if set.position(id).is_none() {
            return Err(MigrateError::UnknownMigration(id.to_string()));
        }
        match applied.last() {
            Some(latest) if latest.migration_id == id => {}
            Some(latest) => {
                let reason = if applied.iter().any(|a| a.migration_id == id) {
                    format!(
                        "only the latest applied migration '{}' can be reverted",
                        latest.migration_id
                    )
                } else {
                    "not applied".to_string()
                };
                return Err(MigrateError::OutOfOrderMigration {
                    migration: id.to_string(),
                    reason,
                });
            }
            None => {
                return Err(MigrateError::OutOfOrderMigration {
                    migration: id.to_string(),
                    reason: "not applied".to_string(),
                });
            }
        }
        self.run_one(migration, Direction::Down).await
    }

    /// Applies pending migrations up to `target` (or all of them).
    ///
    /// Runs the seed plan afterwards when the history was empty at the start.
    pub async fn migrate_up(
        &self,
        set: &MigrationSet,
        target: Option<&str>,
    ) -> Result<MigrationReport> {
        self.init().await?;
        let lock = self.acquire_lock().await?;
        let result = self.migrate_locked(set, Direction::Up, target).await;
        finish(lock, result).await
    }

    /// Reverts applied migrations down to `target`.
    ///
    /// Without a target only the latest applied migration is reverted;
    /// [`REVERT_ALL`] reverts everything.
    pub async fn migrate_down(
        &self,
        set: &MigrationSet,
        target: Option<&str>,
    ) -> Result<MigrationReport> {
        self.init().await?;
        let lock = self.acquire_lock().await?;
        let result = self.migrate_locked(set, Direction::Down, target).await;
        finish(lock, result).await
    }

    async fn migrate_locked(
        &self,
        set: &MigrationSet,
        direction: Direction,
        target: Option<&str>,
    ) -> Result<MigrationReport> {
        let applied = self.history.get_applied().await?;
        self.check_consistency(set, &applied).await?;
        let pending = plan_pending(set, applied.len(), direction, target)?;

        let mut report = MigrationReport {
            first_time_setup: applied.is_empty(),
            ..MigrationReport::default()
        };
        if pending.is_empty() {
            info!(direction = %direction, "No migrations to run");
        }

        for (completed, migration) in pending.into_iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(completed, "Migration run cancelled");
                return Err(MigrateError::Cancelled { completed });
            }
            self.run_one(migration, direction).await?;
            let id = migration.id().to_string();
            match direction {
                Direction::Up => report.applied.push(id),
                Direction::Down => report.reverted.push(id),
            }
        }

        if direction == Direction::Up && report.first_time_setup && !report.applied.is_empty() {
            if let Some(plan) = &self.seed_plan {
                info!("First-time setup, seeding reference data");
                report.seed = Some(SeedExecutor::new(self.pool.clone()).run(plan).await?);
            }
        }
        Ok(report)
    }

    /// Runs `plan` under the migration lock.
    pub async fn seed(&self, plan: &SeedPlan) -> Result<SeedReport> {
        self.init().await?;
        let lock = self.acquire_lock().await?;
        let result = SeedExecutor::new(self.pool.clone()).run(plan).await;
        finish(lock, result).await
    }

    /// Reports the history against `set` without changing anything.
    pub async fn status(&self, set: &MigrationSet) -> Result<StatusReport> {
        self.init().await?;
        let applied = self.history.get_applied().await?;
        let inflight = self.history.get_inflight().await?;
        let lock_holder = HistoryLock::holder(&self.pool, &self.history.lock_table())
            .await?
            .map(|(owner, _)| owner);

        let is_applied = |id: &str| applied.iter().any(|a| a.migration_id == id);
        let pending = set
            .iter()
            .filter(|m| !is_applied(m.id().as_str()))
            .map(|m| m.id().to_string())
            .collect();
        let unknown = applied
            .iter()
            .filter(|a| set.get(&a.migration_id).is_none())
            .map(|a| a.migration_id.clone())
            .collect();

        Ok(StatusReport {
            current_version: applied.last().map(|a| a.migration_id.clone()),
            changed: checksum_drift(set, &applied),
            applied,
            pending,
            unknown,
            inflight,
            lock_holder,
        })
    }

    /// Renders the statements a run would issue without executing them.
    pub async fn script(
        &self,
        set: &MigrationSet,
        direction: Direction,
        target: Option<&str>,
    ) -> Result<Vec<MigrationScript>> {
        let pending = self.pending(set, direction, target).await?;
        let mut conn = self.pool.acquire().await?;
        let live = introspect(&mut conn, &self.dialect, &self.history.owned_tables()).await?;
        drop(conn);

        let mut state = SchemaState::from_schema(live);
        let mut scripts = Vec::with_capacity(pending.len());
        for migration in pending {
            let operations = operations_for(migration, direction);
            let mut statements = Vec::new();
            for (index, operation) in operations.iter().enumerate() {
                self.dialect
                    .validate(operation)
                    .map_err(|u| unsupported(migration, index, u))?;
                let before = state.schema().clone();
                state.apply_operation(operation).map_err(|e| {
                    MigrateError::InvalidState(format!(
                        "{} operation {} ({}): {}",
                        migration.id(),
                        index,
                        operation.description(),
                        e
                    ))
                })?;
                statements.extend(
                    self.dialect
                        .generate_sql(operation, &before, state.schema())
                        .map_err(|u| unsupported(migration, index, u))?,
                );
            }
            scripts.push(MigrationScript {
                migration: migration.id().to_string(),
                direction,
                statements,
            });
        }
        Ok(scripts)
    }

    /// Compares the live schema with a replay of the applied migrations.
    ///
    /// Only tables the replay knows about are compared. Returns the number of
    /// tables checked.
    pub async fn verify(&self, set: &MigrationSet) -> Result<usize> {
        self.init().await?;
        let applied = self.history.get_applied().await?;
        self.check_consistency(set, &applied).await?;

        let mut replay = SchemaState::new();
        for entry in &applied {
            if let Some(migration) = set.get(&entry.migration_id) {
                replay.apply_migration(migration).map_err(|e| {
                    MigrateError::HistoryDesynchronized(format!(
                        "replaying '{}' failed: {}",
                        entry.migration_id, e
                    ))
                })?;
            }
        }

        let mut conn = self.pool.acquire().await?;
        let live = introspect(&mut conn, &self.dialect, &self.history.owned_tables()).await?;
        drop(conn);

        let differences = schema_differences(&self.dialect, replay.schema(), &live);
        if !differences.is_empty() {
            return Err(MigrateError::HistoryDesynchronized(differences.join("; ")));
        }
        let checked = replay.schema().tables.len();
        info!(tables = checked, "Schema matches migration history");
        Ok(checked)
    }

    /// Settles an interrupted run by stating whether `id` is applied.
    pub async fn resolve(&self, set: &MigrationSet, id: &str, applied: bool) -> Result<()> {
        self.init().await?;
        let lock = self.acquire_lock().await?;
        let result = self.resolve_locked(set, id, applied).await;
        finish(lock, result).await
    }

    async fn resolve_locked(&self, set: &MigrationSet, id: &str, applied: bool) -> Result<()> {
        let marker = self.history.get_inflight().await?;
        if marker.as_ref().map(|m| m.migration_id.as_str()) != Some(id) {
            return Err(MigrateError::Validation(format!(
                "No interrupted run of '{}' to resolve",
                id
            )));
        }
        let migration = set
            .get(id)
            .ok_or_else(|| MigrateError::UnknownMigration(id.to_string()))?;
        let recorded = self.history.is_applied(id).await?;

        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;
        if applied && !recorded {
            self.history
                .record_applied(&mut tx, id, migration.checksum())
                .await?;
        } else if !applied && recorded {
            self.history.record_unapplied(&mut tx, id).await?;
        }
        self.history.clear_inflight(&mut tx, id).await?;
        tx.commit().await?;

        warn!(migration = %id, applied, "Resolved interrupted migration");
        Ok(())
    }

    /// Removes the lock row whoever holds it.
    pub async fn unlock(&self) -> Result<Option<String>> {
        self.init().await?;
        let removed = HistoryLock::force_release(&self.pool, &self.history.lock_table()).await?;
        match &removed {
            Some(owner) => warn!(owner = %owner, "Force-released migration lock"),
            None => info!("Migration lock was not held"),
        }
        Ok(removed)
    }

    async fn acquire_lock(&self) -> Result<HistoryLock> {
        HistoryLock::acquire(
            &self.pool,
            &self.history.lock_table(),
            &self.config.owner,
            self.config.lock_timeout,
            self.config.lock_poll_interval,
        )
        .await
    }

    /// Fails unless the history is a clean prefix of `set`.
    async fn check_consistency(
        &self,
        set: &MigrationSet,
        applied: &[AppliedMigration],
    ) -> Result<()> {
        if let Some(marker) = self.history.get_inflight().await? {
            return Err(MigrateError::HistoryDesynchronized(format!(
                "'{}' was interrupted while running {} at {}; run `migrate resolve`",
                marker.migration_id, marker.direction, marker.started_at
            )));
        }

        for (index, entry) in applied.iter().enumerate() {
            if set.get(&entry.migration_id).is_none() {
                return Err(MigrateError::HistoryDesynchronized(format!(
                    "applied migration '{}' is not in the migration list",
                    entry.migration_id
                )));
            }
            let expected = set.at(index).map_or("", |m| m.id().as_str());
            if entry.migration_id != expected {
                return Err(MigrateError::HistoryDesynchronized(format!(
                    "'{}' is applied but earlier migration '{}' is not",
                    entry.migration_id, expected
                )));
            }
        }

        for id in checksum_drift(set, applied) {
            warn!(migration = %id, "Applied migration has been modified since it was applied");
        }
        Ok(())
    }

    /// Runs one descriptor with its own connection.
    async fn run_one(&self, migration: &MigrationDescriptor, direction: Direction) -> Result<()> {
        match direction {
            Direction::Up => info!(migration = %migration.id(), "Applying migration"),
            Direction::Down => info!(migration = %migration.id(), "Reverting migration"),
        }
        let started = Instant::now();

        let mut conn = self.pool.acquire().await?;
        run_statements(&mut conn, &self.dialect.pre_migration_sql()).await?;

        let execution = self.execute(&mut conn, migration, direction);
        let result = match self.config.apply_timeout {
            Some(budget) => match tokio::time::timeout(budget, execution).await {
                Ok(result) => result,
                Err(_) => Err(MigrateError::ApplyTimeout {
                    migration: migration.id().to_string(),
                    timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                }),
            },
            None => execution.await,
        };

        let restored = run_statements(&mut conn, &self.dialect.post_migration_sql()).await;
        result?;
        restored?;

        info!(
            migration = %migration.id(),
            direction = %direction,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Migration complete"
        );
        Ok(())
    }

    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        migration: &MigrationDescriptor,
        direction: Direction,
    ) -> Result<()> {
        let operations = operations_for(migration, direction);
        self.preflight(conn, migration, operations).await?;

        if self.dialect.supports_transactional_ddl() {
            let mut tx = conn.begin().await?;
            self.execute_operations(&mut tx, migration, operations).await?;
            self.check_integrity(&mut tx, migration, operations.len()).await?;
            self.record(&mut tx, migration, direction).await?;
            tx.commit().await?;
        } else {
            // The marker stays behind if anything below fails.
            self.history
                .mark_inflight(conn, migration.id().as_str(), direction.as_str())
                .await?;
            self.execute_operations(conn, migration, operations).await?;
            self.check_integrity(conn, migration, operations.len()).await?;
            let mut tx = conn.begin().await?;
            self.record(&mut tx, migration, direction).await?;
            self.history
                .clear_inflight(&mut tx, migration.id().as_str())
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }

    /// Rejects the descriptor before any of its statements run.
    async fn preflight(
        &self,
        conn: &mut SqliteConnection,
        migration: &MigrationDescriptor,
        operations: &[MigrationOperation],
    ) -> Result<()> {
        for (index, operation) in operations.iter().enumerate() {
            self.dialect
                .validate(operation)
                .map_err(|u| unsupported(migration, index, u))?;
        }

        let live = introspect(conn, &self.dialect, &self.history.owned_tables()).await?;
        let mut state = SchemaState::from_schema(live);
        for (index, operation) in operations.iter().enumerate() {
            // Past raw SQL or an invalid step the schema is unknown; execution
            // reports what happens there.
            if matches!(operation, MigrationOperation::ExecuteRaw { .. }) {
                break;
            }
            let before = state.schema().clone();
            if state.apply_operation(operation).is_err() {
                break;
            }
            self.dialect
                .generate_sql(operation, &before, state.schema())
                .map_err(|u| unsupported(migration, index, u))?;
        }
        Ok(())
    }

    async fn execute_operations(
        &self,
        conn: &mut SqliteConnection,
        migration: &MigrationDescriptor,
        operations: &[MigrationOperation],
    ) -> Result<()> {
        let excluded = self.history.owned_tables();
        let mut state = SchemaState::from_schema(introspect(conn, &self.dialect, &excluded).await?);

        for (index, operation) in operations.iter().enumerate() {
            let failed = |cause: String| MigrateError::MigrationFailed {
                migration: migration.id().to_string(),
                operation_index: index,
                operation: operation.description(),
                cause,
            };

            let before = state.schema().clone();
            state
                .apply_operation(operation)
                .map_err(|e| failed(e.to_string()))?;
            let statements = self
                .dialect
                .generate_sql(operation, &before, state.schema())
                .map_err(|u| unsupported(migration, index, u))?;

            for sql in &statements {
                debug!(sql = %sql, "Executing SQL");
                sqlx::query(sql)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
            }

            if matches!(operation, MigrationOperation::ExecuteRaw { .. }) {
                let live = introspect(conn, &self.dialect, &excluded)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                state = SchemaState::from_schema(live);
            }
        }
        Ok(())
    }

    async fn check_integrity(
        &self,
        conn: &mut SqliteConnection,
        migration: &MigrationDescriptor,
        operation_count: usize,
    ) -> Result<()> {
        let Some(sql) = self.dialect.integrity_check_sql() else {
            return Ok(());
        };
        let violations: Vec<String> = sqlx::query_scalar(sql).fetch_all(&mut *conn).await?;
        if let Some(table) = violations.first() {
            return Err(MigrateError::MigrationFailed {
                migration: migration.id().to_string(),
                operation_index: operation_count.saturating_sub(1),
                operation: "foreign key check".to_string(),
                cause: format!(
                    "{} foreign key violation(s), first in table '{}'",
                    violations.len(),
                    table
                ),
            });
        }
        Ok(())
    }

    async fn record(
        &self,
        conn: &mut SqliteConnection,
        migration: &MigrationDescriptor,
        direction: Direction,
    ) -> Result<()> {
        let id = migration.id().as_str();
        match direction {
            Direction::Up => {
                self.history
                    .record_applied(conn, id, migration.checksum())
                    .await
            }
            Direction::Down => self.history.record_unapplied(conn, id).await,
        }
    }
}

/// Releases `lock` and returns `result`, preferring the first error.
async fn finish<T>(lock: HistoryLock, result: Result<T>) -> Result<T> {
    let released = lock.release().await;
    let value = result?;
    released?;
    Ok(value)
}

async fn run_statements(conn: &mut SqliteConnection, statements: &[String]) -> Result<()> {
    for sql in statements {
        debug!(sql = %sql, "Executing SQL");
        sqlx::query(sql).execute(&mut *conn).await?;
    }
    Ok(())
}

fn operations_for(migration: &MigrationDescriptor, direction: Direction) -> &[MigrationOperation] {
    match direction {
        Direction::Up => migration.up(),
        Direction::Down => migration.down(),
    }
}

fn unsupported(
    migration: &MigrationDescriptor,
    operation_index: usize,
    unsupported: Unsupported,
) -> MigrateError {
    MigrateError::UnsupportedOperation {
        migration: migration.id().to_string(),
        operation_index,
        op_kind: unsupported.op_kind,
        detail: unsupported.detail,
    }
}

/// Applied ids whose recorded checksum differs from the descriptor's.
fn checksum_drift(set: &MigrationSet, applied: &[AppliedMigration]) -> Vec<String> {
    applied
        .iter()
        .filter(|entry| {
            set.get(&entry.migration_id)
                .is_some_and(|m| m.checksum() != entry.checksum)
        })
        .map(|entry| entry.migration_id.clone())
        .collect()
}

/// Descriptors to run given `applied` leading entries of `set` are applied.
pub(crate) fn plan_pending<'s>(
    set: &'s MigrationSet,
    applied: usize,
    direction: Direction,
    target: Option<&str>,
) -> Result<Vec<&'s MigrationDescriptor>> {
    let applied = applied.min(set.len());
    let position = |id: &str| {
        set.position(id)
            .ok_or_else(|| MigrateError::UnknownMigration(id.to_string()))
    };

    let range = match (direction, target) {
        (Direction::Up, None) => applied..set.len(),
        (Direction::Up, Some(id)) => {
            let end = position(id)? + 1;
            applied..end.max(applied)
        }
        (Direction::Down, None) => applied.saturating_sub(1)..applied,
        (Direction::Down, Some(REVERT_ALL)) => 0..applied,
        (Direction::Down, Some(id)) => {
            let start = position(id)? + 1;
            start.min(applied)..applied
        }
    };

    let selected = range.filter_map(|i| set.at(i));
    Ok(match direction {
        Direction::Up => selected.collect(),
        Direction::Down => selected.rev().collect(),
    })
}

fn table_differences<D: MigrationDialect + ?Sized>(
    dialect: &D,
    expected: &TableSchema,
    live: &TableSchema,
    out: &mut Vec<String>,
) {
    let table = &expected.name;
    for column in &expected.columns {
        match live.get_column(&column.name) {
            None => out.push(format!("column '{}.{}' is missing", table, column.name)),
            Some(actual) => {
                let want = dialect.column_definition(column);
                let have = dialect.column_definition(actual);
                if want != have || column.auto_increment != actual.auto_increment {
                    out.push(format!(
                        "column '{}.{}' is `{}`, expected `{}`",
                        table, column.name, have, want
                    ));
                }
            }
        }
    }
    for column in &live.columns {
        if expected.get_column(&column.name).is_none() {
            out.push(format!("column '{}.{}' is not expected", table, column.name));
        }
    }

    if expected.primary_key != live.primary_key {
        out.push(format!("primary key of '{}' differs", table));
    }

    let mut want = expected.indexes.clone();
    let mut have = live.indexes.clone();
    want.sort_by(|a, b| a.name.cmp(&b.name));
    have.sort_by(|a, b| a.name.cmp(&b.name));
    if want != have {
        out.push(format!("indexes of '{}' differ", table));
    }

    let mut want = expected.foreign_keys.clone();
    let mut have = live.foreign_keys.clone();
    want.sort_by(|a, b| a.name.cmp(&b.name));
    have.sort_by(|a, b| a.name.cmp(&b.name));
    if want != have {
        out.push(format!("foreign keys of '{}' differ", table));
    }
}

/// Differences between a replayed schema and the live one, for replayed tables.
fn schema_differences<D: MigrationDialect + ?Sized>(
    dialect: &D,
    expected: &DatabaseSchema,
    live: &DatabaseSchema,
) -> Vec<String> {
    let mut out = Vec::new();
    for table in &expected.tables {
        match live.get_table(&table.name) {
            Some(actual) => table_differences(dialect, table, actual, &mut out),
            None => out.push(format!("table '{}' is missing", table.name)),
        }
    }
    out
}
