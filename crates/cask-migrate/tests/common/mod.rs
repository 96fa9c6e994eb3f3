#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cask_migrate::dialect::Unsupported;
use cask_migrate::introspect::introspect;
use cask_migrate::prelude::*;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub const CREATE_STATUS: &str = "201904151230451_CreateStatus";
pub const CREATE_CASK: &str = "201904161015000_CreateCask";
pub const ADD_PROOF: &str = "201905020900000_AddCaskProof";
pub const ADD_WAREHOUSE: &str = "201905101200000_AddWarehouse";
pub const RENAME_LABEL: &str = "201906011100000_RenameCaskLabel";

pub async fn create_test_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

pub fn fast_config() -> RunnerConfig {
    RunnerConfig::new()
        .lock_timeout(Duration::from_millis(50))
        .lock_poll_interval(Duration::from_millis(5))
}

pub fn runner(pool: &SqlitePool) -> MigrationRunner<SqliteDialect> {
    MigrationRunner::new(pool.clone(), SqliteDialect::new()).with_config(fast_config())
}

/// Live schema, without the history tables.
pub async fn live_schema(pool: &SqlitePool) -> DatabaseSchema {
    let mut conn = pool.acquire().await.unwrap();
    let excluded = vec![
        "cask_migrations".to_string(),
        "cask_migrations_lock".to_string(),
        "cask_migrations_inflight".to_string(),
    ];
    introspect(&mut conn, &SqliteDialect::new(), &excluded)
        .await
        .unwrap()
}

pub async fn applied_ids(pool: &SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT migration_id FROM cask_migrations ORDER BY migration_id")
        .fetch_all(pool)
        .await
        .unwrap()
}

// =============================================================================
// Migrations
// =============================================================================

pub fn create_status() -> MigrationDescriptor {
    MigrationDescriptor::builder(CREATE_STATUS)
        .up(CreateTableBuilder::new("Status")
            .column(ColumnSchema::new("Id", SqlType::Integer).identity())
            .column(ColumnSchema::new("Name", SqlType::Varchar(50)).not_null())
            .primary_key("PK_Status", &["Id"])
            .build())
        .build()
        .unwrap()
}

pub fn create_cask() -> MigrationDescriptor {
    MigrationDescriptor::builder(CREATE_CASK)
        .up(CreateTableBuilder::new("Cask")
            .column(ColumnSchema::new("Id", SqlType::BigInt).not_null())
            .column(ColumnSchema::new("Label", SqlType::Varchar(100)).not_null())
            .column(ColumnSchema::new("StatusId", SqlType::Integer).not_null())
            .column(ColumnSchema::new("FilledOn", SqlType::Date))
            .column(ColumnSchema::new("LastTouched", SqlType::DateTime(Some(3))))
            .column(ColumnSchema::new("Updated", SqlType::DateTimeOffset(Some(7))))
            .column(ColumnSchema::new("Volume", SqlType::Decimal(10, 2)))
            .column(ColumnSchema::new("RowVersion", SqlType::RowVersion).not_null())
            .primary_key("PK_Cask", &["Id"])
            .foreign_key(
                ForeignKeyBuilder::new("FK_Cask_Status_StatusId")
                    .columns(&["StatusId"])
                    .references("Status", &["Id"])
                    .on_delete(ForeignKeyAction::Cascade)
                    .build(),
            )
            .build())
        .up(MigrationOperation::create_index(
            "Cask",
            IndexBuilder::new("IX_Cask_StatusId")
                .columns(&["StatusId"])
                .build(),
        ))
        .build()
        .unwrap()
}

pub fn add_proof() -> MigrationDescriptor {
    MigrationDescriptor::builder(ADD_PROOF)
        .up(MigrationOperation::add_column(
            "Cask",
            ColumnSchema::new("Proof", SqlType::Double),
        ))
        .up(MigrationOperation::create_index(
            "Cask",
            IndexBuilder::new("IX_Cask_Label")
                .columns(&["Label"])
                .unique()
                .build(),
        ))
        .build()
        .unwrap()
}

pub fn add_warehouse() -> MigrationDescriptor {
    MigrationDescriptor::builder(ADD_WAREHOUSE)
        .up(CreateTableBuilder::new("Warehouse")
            .column(ColumnSchema::new("Code", SqlType::Char(4)).not_null())
            .column(
                ColumnSchema::new("Name", SqlType::Text)
                    .not_null()
                    .default(DefaultValue::String("Main".to_string())),
            )
            .primary_key("PK_Warehouse", &["Code"])
            .build())
        .up(MigrationOperation::add_column(
            "Cask",
            ColumnSchema::new("WarehouseCode", SqlType::Char(4)),
        ))
        .up(MigrationOperation::add_foreign_key(
            "Cask",
            ForeignKeyBuilder::new("FK_Cask_Warehouse_WarehouseCode")
                .columns(&["WarehouseCode"])
                .references("Warehouse", &["Code"])
                .on_delete(ForeignKeyAction::SetNull)
                .build(),
        ))
        .build()
        .unwrap()
}

pub fn rename_label() -> MigrationDescriptor {
    MigrationDescriptor::builder(RENAME_LABEL)
        .up(MigrationOperation::rename_column("Cask", "Label", "Name"))
        .build()
        .unwrap()
}

pub fn distillery() -> MigrationSet {
    MigrationSet::new(vec![
        create_status(),
        create_cask(),
        add_proof(),
        add_warehouse(),
        rename_label(),
    ])
    .unwrap()
}

// =============================================================================
// Dialect wrappers
// =============================================================================

/// SQLite, but treated as a store without transactional DDL.
pub struct NonTransactional(pub SqliteDialect);

impl MigrationDialect for NonTransactional {
    fn name(&self) -> &'static str {
        "sqlite-non-transactional"
    }

    fn validate(&self, operation: &MigrationOperation) -> std::result::Result<(), Unsupported> {
        self.0.validate(operation)
    }

    fn generate_sql(
        &self,
        operation: &MigrationOperation,
        before: &DatabaseSchema,
        after: &DatabaseSchema,
    ) -> std::result::Result<Vec<String>, Unsupported> {
        self.0.generate_sql(operation, before, after)
    }

    fn type_name(&self, sql_type: &SqlType) -> String {
        self.0.type_name(sql_type)
    }

    fn parse_type(&self, declared: &str) -> SqlType {
        self.0.parse_type(declared)
    }

    fn column_definition(&self, column: &ColumnSchema) -> String {
        self.0.column_definition(column)
    }

    fn supports_transactional_ddl(&self) -> bool {
        false
    }

    fn pre_migration_sql(&self) -> Vec<String> {
        self.0.pre_migration_sql()
    }

    fn post_migration_sql(&self) -> Vec<String> {
        self.0.post_migration_sql()
    }

    fn integrity_check_sql(&self) -> Option<&'static str> {
        self.0.integrity_check_sql()
    }
}

/// SQLite that raises a cancellation flag once it has planned a statement.
pub struct CancelAfterFirst {
    pub inner: SqliteDialect,
    pub flag: Arc<AtomicBool>,
}

impl MigrationDialect for CancelAfterFirst {
    fn name(&self) -> &'static str {
        "sqlite-cancelling"
    }

    fn validate(&self, operation: &MigrationOperation) -> std::result::Result<(), Unsupported> {
        self.inner.validate(operation)
    }

    fn generate_sql(
        &self,
        operation: &MigrationOperation,
        before: &DatabaseSchema,
        after: &DatabaseSchema,
    ) -> std::result::Result<Vec<String>, Unsupported> {
        self.flag.store(true, Ordering::SeqCst);
        self.inner.generate_sql(operation, before, after)
    }

    fn type_name(&self, sql_type: &SqlType) -> String {
        self.inner.type_name(sql_type)
    }

    fn parse_type(&self, declared: &str) -> SqlType {
        self.inner.parse_type(declared)
    }

    fn column_definition(&self, column: &ColumnSchema) -> String {
        self.inner.column_definition(column)
    }

    fn pre_migration_sql(&self) -> Vec<String> {
        self.inner.pre_migration_sql()
    }

    fn post_migration_sql(&self) -> Vec<String> {
        self.inner.post_migration_sql()
    }

    fn integrity_check_sql(&self) -> Option<&'static str> {
        self.inner.integrity_check_sql()
    }
}
