//! Error types for the migration system.

use std::path::PathBuf;

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The descriptor list (or a seed plan) was rejected before anything ran.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An apply or revert would break the total ordering of migrations.
    #[error("Migration '{migration}' cannot run out of order: {reason}")]
    OutOfOrderMigration {
        /// The migration the caller asked for.
        migration: String,
        /// What the ordering check found.
        reason: String,
    },

    /// The history lock could not be acquired in time.
    #[error("Timed out after {waited_ms} ms waiting for the migration lock (held by {holder})")]
    LockTimeout {
        /// How long we waited, in milliseconds.
        waited_ms: u64,
        /// Owner token recorded in the lock row, if it could be read.
        holder: String,
    },

    /// An operation of a migration failed; the migration was rolled back.
    #[error("Migration '{migration}' failed at operation {operation_index} ({operation}): {cause}")]
    MigrationFailed {
        /// The migration being applied or reverted.
        migration: String,
        /// Index of the failing operation within the `up` or `down` list.
        operation_index: usize,
        /// Human-readable description of the failing operation.
        operation: String,
        /// Underlying store error.
        cause: String,
    },

    /// The history store disagrees with the schema or the descriptor list.
    #[error("Migration history is out of sync and needs manual resolution: {0}")]
    HistoryDesynchronized(String),

    /// The dialect cannot express an operation.
    #[error("Migration '{migration}' operation {operation_index} ({op_kind}) is not supported: {detail}")]
    UnsupportedOperation {
        /// The migration containing the operation.
        migration: String,
        /// Index of the operation within its list.
        operation_index: usize,
        /// Operation variant name.
        op_kind: &'static str,
        /// Why it cannot be translated.
        detail: String,
    },

    /// A target id does not name any known migration.
    #[error("Migration not found: {0}")]
    UnknownMigration(String),

    /// An apply or revert exceeded its time budget and was rolled back.
    #[error("Migration '{migration}' exceeded its {timeout_ms} ms budget and was rolled back")]
    ApplyTimeout {
        /// The migration that timed out.
        migration: String,
        /// The configured budget, in milliseconds.
        timeout_ms: u64,
    },

    /// The run was cancelled between migrations.
    #[error("Cancelled after {completed} migration(s)")]
    Cancelled {
        /// Migrations that completed before the cancellation was observed.
        completed: usize,
    },

    /// Database error outside of a migration's operations.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading descriptor or seed files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a descriptor or seed file.
    #[error("Failed to parse '{path}': {message}")]
    ParseError {
        /// Path to the file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Invalid schema state while replaying operations.
    #[error("Invalid migration state: {0}")]
    InvalidState(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrateError {
    /// Process exit code for the `migrate` binary.
    ///
    /// `2` marks failures that happened while a migration was running and
    /// need an operator to look at the database; everything else is `1`.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MigrationFailed { .. }
            | Self::ApplyTimeout { .. }
            | Self::HistoryDesynchronized(_) => 2,
            _ => 1,
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
