//! Database dialect implementations.
//!
//! A dialect turns one migration operation into the statements that carry it
//! out, given the schema before and after the operation.

mod sqlite;

pub use sqlite::SqliteDialect;

use crate::operations::MigrationOperation;
use crate::schema::{ColumnSchema, DatabaseSchema, SqlType};

/// An operation the dialect cannot express.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsupported {
    /// Operation variant name.
    pub op_kind: &'static str,
    /// Why it cannot be translated.
    pub detail: String,
}

impl Unsupported {
    /// Creates an unsupported-operation report.
    #[must_use]
    pub fn new(op_kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            op_kind,
            detail: detail.into(),
        }
    }
}

/// Trait for database-specific SQL generation.
pub trait MigrationDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Checks an operation on its own, without looking at any schema.
    fn validate(&self, operation: &MigrationOperation) -> Result<(), Unsupported>;

    /// Generates the statements for `operation`.
    ///
    /// `before` is the schema the operation runs against and `after` is the
    /// schema once it has been applied.
    fn generate_sql(
        &self,
        operation: &MigrationOperation,
        before: &DatabaseSchema,
        after: &DatabaseSchema,
    ) -> Result<Vec<String>, Unsupported>;

    /// Returns the SQL type name for the given type.
    fn type_name(&self, sql_type: &SqlType) -> String;

    /// Maps a declared type read back from the catalog onto the model.
    fn parse_type(&self, declared: &str) -> SqlType;

    /// Generates column definition SQL (without key clauses).
    fn column_definition(&self, column: &ColumnSchema) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.type_name(&column.sql_type),
        ];

        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }

        if column.unique {
            parts.push("UNIQUE".to_string());
        }

        if let Some(default_sql) = column.default.to_sql() {
            parts.push(format!("DEFAULT {}", default_sql));
        }

        parts.join(" ")
    }

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Whether schema changes and the history write can share one transaction.
    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    /// Statements run on the migration connection before its transaction opens.
    fn pre_migration_sql(&self) -> Vec<String> {
        Vec::new()
    }

    /// Statements run on the migration connection after its transaction ends.
    fn post_migration_sql(&self) -> Vec<String> {
        Vec::new()
    }

    /// A query that returns rows when referential integrity is violated.
    ///
    /// Run inside the migration transaction just before commit.
    fn integrity_check_sql(&self) -> Option<&'static str> {
        None
    }
}
