//! Ordered, reversible schema migrations for SQLite.
//!
//! `cask-migrate` applies an ordered log of migration descriptors to a live
//! database, keeps a history of what ran, and reverses it on demand:
//! - Every descriptor pairs an `up` list of operations with a `down` list
//!   that undoes it (derived automatically when every operation has an
//!   inverse)
//! - Each descriptor runs in one transaction together with its history write
//! - A lock row keeps concurrent runners apart
//! - Reference data is seeded with idempotent natural-key upserts
//!
//! # Architecture
//!
//! - **Descriptor** - `MigrationDescriptor` and the ordered `MigrationSet`
//! - **Operations** - Schema changes like `CreateTable`, `AlterColumn`, `AddForeignKey`
//! - **Dialect** - Turns operations into SQLite statements, rebuilding tables
//!   where `ALTER TABLE` falls short
//! - **History** - The applied-migrations table and its lock and marker tables
//! - **Runner** - Computes pending work and applies or reverts it
//! - **Seed** - Natural-key upserts and raw cleanup steps
//!
//! # Example
//!
//! ```rust,ignore
//! use cask_migrate::prelude::*;
//!
//! pub struct AddStatus;
//!
//! impl Migration for AddStatus {
//!     const ID: &'static str = "201904151230451_AddStatus";
//!
//!     fn up() -> Vec<MigrationOperation> {
//!         vec![CreateTableBuilder::new("Status")
//!             .column(ColumnSchema::new("Id", SqlType::Integer).identity())
//!             .column(ColumnSchema::new("Name", SqlType::Varchar(50)).not_null())
//!             .primary_key("PK_Status", &["Id"])
//!             .build()]
//!     }
//! }
//!
//! let set = MigrationSet::new(vec![AddStatus::to_descriptor()?])?;
//! let runner = MigrationRunner::new(pool, SqliteDialect::new());
//! runner.migrate_up(&set, None).await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Apply pending migrations from a directory of JSON descriptors
//! migrate --migrations-dir migrations up
//!
//! # Show the SQL without running it
//! migrate up --dry-run
//!
//! # Revert the latest migration, or everything
//! migrate down
//! migrate down --to 0
//! ```

pub mod config;
pub mod descriptor;
pub mod dialect;
pub mod error;
pub mod history;
pub mod introspect;
pub mod loader;
pub mod lock;
pub mod operations;
pub mod runner;
pub mod schema;
pub mod seed;
pub mod state;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::RunnerConfig;
    pub use crate::descriptor::{MigrationDescriptor, MigrationId, MigrationSet};
    pub use crate::dialect::{MigrationDialect, SqliteDialect};
    pub use crate::error::{MigrateError, Result};
    pub use crate::history::MigrationHistory;
    pub use crate::operations::{
        ColumnChanges, CreateTableBuilder, ForeignKeyBuilder, IndexBuilder, MigrationOperation,
    };
    pub use crate::runner::{Direction, MigrationReport, MigrationRunner, REVERT_ALL};
    pub use crate::schema::{
        ColumnSchema, DatabaseSchema, DefaultValue, ForeignKeyAction, ForeignKeySchema,
        IndexSchema, PrimaryKeySchema, SqlType, TableSchema,
    };
    pub use crate::seed::{SeedBatch, SeedExecutor, SeedPlan, SeedReport, SeedValue};
    pub use crate::state::SchemaState;
    pub use crate::Migration;
}

/// Trait for migrations defined in Rust code.
pub trait Migration {
    /// Migration id: digits, `_`, then a name.
    const ID: &'static str;

    /// Operations that move the schema forward.
    fn up() -> Vec<operations::MigrationOperation>;

    /// Operations that undo `up`; derived from `up` when `None`.
    fn down() -> Option<Vec<operations::MigrationOperation>> {
        None
    }

    /// Builds the descriptor.
    fn to_descriptor() -> error::Result<descriptor::MigrationDescriptor> {
        descriptor::MigrationDescriptor::from_parts(Self::ID, Self::up(), Self::down())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;

    struct CreateStill;

    impl Migration for CreateStill {
        const ID: &'static str = "0001_CreateStill";

        fn up() -> Vec<MigrationOperation> {
            vec![MigrationOperation::create_table(
                "Still",
                vec![ColumnSchema::new("Name", SqlType::Text).not_null()],
            )]
        }
    }

    struct DropStill;

    impl Migration for DropStill {
        const ID: &'static str = "0002_DropStill";

        fn up() -> Vec<MigrationOperation> {
            vec![MigrationOperation::drop_table("Still")]
        }

        fn down() -> Option<Vec<MigrationOperation>> {
            Some(CreateStill::up())
        }
    }

    #[test]
    fn test_migration_trait() {
        let descriptor = CreateStill::to_descriptor().unwrap();
        assert_eq!(descriptor.id().as_str(), "0001_CreateStill");
        assert_eq!(descriptor.up().len(), 1);
        assert_eq!(
            descriptor.down(),
            &[MigrationOperation::drop_table("Still")]
        );
    }

    #[test]
    fn test_explicit_down() {
        let descriptor = DropStill::to_descriptor().unwrap();
        assert_eq!(descriptor.down(), CreateStill::up().as_slice());
    }
}
