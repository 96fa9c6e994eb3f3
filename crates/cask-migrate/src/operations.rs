//! Migration operations.
//!
//! This module defines the closed set of schema changes a migration can
//! express, together with the rules for deriving their inverse.

use serde::{Deserialize, Serialize};

use crate::schema::{
    ColumnSchema, DefaultValue, ForeignKeyAction, ForeignKeySchema, IndexSchema, PrimaryKeySchema,
    SqlType,
};

/// Changes to apply to an existing column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ColumnChanges {
    /// New data type (if changing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<SqlType>,
    /// New nullability (if changing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    /// New default value (if changing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// New unique constraint (if changing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
}

impl ColumnChanges {
    /// Creates empty column changes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a new type.
    #[must_use]
    pub fn set_type(mut self, sql_type: SqlType) -> Self {
        self.sql_type = Some(sql_type);
        self
    }

    /// Sets nullability.
    #[must_use]
    pub fn set_nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Sets default value.
    #[must_use]
    pub fn set_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Sets unique constraint.
    #[must_use]
    pub fn set_unique(mut self, unique: bool) -> Self {
        self.unique = Some(unique);
        self
    }

    /// Returns true if no changes are specified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sql_type.is_none()
            && self.nullable.is_none()
            && self.default.is_none()
            && self.unique.is_none()
    }

    /// Applies these changes to a column definition.
    #[must_use]
    pub fn apply_to(&self, column: &ColumnSchema) -> ColumnSchema {
        let mut changed = column.clone();
        if let Some(sql_type) = &self.sql_type {
            changed.sql_type = sql_type.clone();
        }
        if let Some(nullable) = self.nullable {
            changed.nullable = nullable;
        }
        if let Some(default) = &self.default {
            changed.default = default.clone();
        }
        if let Some(unique) = self.unique {
            changed.unique = unique;
        }
        changed
    }

    /// Changes that turn any column back into `column`.
    #[must_use]
    pub fn restoring(column: &ColumnSchema) -> Self {
        Self {
            sql_type: Some(column.sql_type.clone()),
            nullable: Some(column.nullable),
            default: Some(column.default.clone()),
            unique: Some(column.unique),
        }
    }
}

/// A single migration operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationOperation {
    /// Create a new table.
    CreateTable {
        /// Table name.
        name: String,
        /// Column definitions.
        columns: Vec<ColumnSchema>,
        /// Named primary key, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        primary_key: Option<PrimaryKeySchema>,
        /// Foreign keys declared with the table.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        foreign_keys: Vec<ForeignKeySchema>,
    },

    /// Drop a table.
    DropTable {
        /// Table name.
        name: String,
    },

    /// Rename a table.
    RenameTable {
        /// Old table name.
        old_name: String,
        /// New table name.
        new_name: String,
    },

    /// Add a column to a table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnSchema,
    },

    /// Drop a column from a table.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Old column name.
        old_name: String,
        /// New column name.
        new_name: String,
    },

    /// Alter a column's properties.
    AlterColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Changes to apply.
        changes: ColumnChanges,
        /// Column definition before the change (needed to reverse it).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original: Option<ColumnSchema>,
    },

    /// Add a named primary key.
    AddPrimaryKey {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
        /// Key columns, in key order.
        columns: Vec<String>,
    },

    /// Drop a table's primary key.
    DropPrimaryKey {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
    },

    /// Add a foreign key constraint.
    AddForeignKey {
        /// Table name.
        table: String,
        /// Foreign key definition.
        foreign_key: ForeignKeySchema,
    },

    /// Drop a foreign key constraint.
    DropForeignKey {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
    },

    /// Create an index.
    CreateIndex {
        /// Index name.
        name: String,
        /// Table name.
        table: String,
        /// Columns to index.
        columns: Vec<String>,
        /// Whether this is a unique index.
        #[serde(default)]
        unique: bool,
        /// Partial index condition.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },

    /// Drop an index.
    DropIndex {
        /// Index name.
        name: String,
        /// Owning table, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    },

    /// Execute a raw SQL statement.
    ExecuteRaw {
        /// Statement to run.
        sql: String,
        /// Statement that undoes it, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reverse_sql: Option<String>,
    },
}

impl MigrationOperation {
    /// Creates a CreateTable operation without keys.
    #[must_use]
    pub fn create_table(name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self::CreateTable {
            name: name.into(),
            columns,
            primary_key: None,
            foreign_keys: Vec::new(),
        }
    }

    /// Creates a DropTable operation.
    #[must_use]
    pub fn drop_table(name: impl Into<String>) -> Self {
        Self::DropTable { name: name.into() }
    }

    /// Creates a RenameTable operation.
    #[must_use]
    pub fn rename_table(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self::RenameTable {
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    /// Creates an AddColumn operation.
    #[must_use]
    pub fn add_column(table: impl Into<String>, column: ColumnSchema) -> Self {
        Self::AddColumn {
            table: table.into(),
            column,
        }
    }

    /// Creates a DropColumn operation.
    #[must_use]
    pub fn drop_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::DropColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates a RenameColumn operation.
    #[must_use]
    pub fn rename_column(
        table: impl Into<String>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self::RenameColumn {
            table: table.into(),
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    /// Creates an AlterColumn operation.
    #[must_use]
    pub fn alter_column(
        table: impl Into<String>,
        column: impl Into<String>,
        changes: ColumnChanges,
    ) -> Self {
        Self::AlterColumn {
            table: table.into(),
            column: column.into(),
            changes,
            original: None,
        }
    }

    /// Records the pre-change definition on an AlterColumn so it can be reversed.
    ///
    /// Other operations are returned unchanged.
    #[must_use]
    pub fn with_original(self, column: ColumnSchema) -> Self {
        match self {
            Self::AlterColumn {
                table,
                column: name,
                changes,
                ..
            } => Self::AlterColumn {
                table,
                column: name,
                changes,
                original: Some(column),
            },
            other => other,
        }
    }

    /// Creates an AddPrimaryKey operation.
    #[must_use]
    pub fn add_primary_key(
        table: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self::AddPrimaryKey {
            table: table.into(),
            name: name.into(),
            columns,
        }
    }

    /// Creates a DropPrimaryKey operation.
    #[must_use]
    pub fn drop_primary_key(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DropPrimaryKey {
            table: table.into(),
            name: name.into(),
        }
    }

    /// Creates an AddForeignKey operation.
    #[must_use]
    pub fn add_foreign_key(table: impl Into<String>, foreign_key: ForeignKeySchema) -> Self {
        Self::AddForeignKey {
            table: table.into(),
            foreign_key,
        }
    }

    /// Creates a DropForeignKey operation.
    #[must_use]
    pub fn drop_foreign_key(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DropForeignKey {
            table: table.into(),
            name: name.into(),
        }
    }

    /// Creates a CreateIndex operation from an index definition.
    #[must_use]
    pub fn create_index(table: impl Into<String>, index: IndexSchema) -> Self {
        Self::CreateIndex {
            name: index.name,
            table: table.into(),
            columns: index.columns,
            unique: index.unique,
            condition: index.condition,
        }
    }

    /// Creates a DropIndex operation.
    #[must_use]
    pub fn drop_index(name: impl Into<String>, table: Option<String>) -> Self {
        Self::DropIndex {
            name: name.into(),
            table,
        }
    }

    /// Creates an ExecuteRaw operation.
    #[must_use]
    pub fn execute_raw(sql: impl Into<String>, reverse_sql: Option<String>) -> Self {
        Self::ExecuteRaw {
            sql: sql.into(),
            reverse_sql,
        }
    }

    /// Variant name, used in error reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "CreateTable",
            Self::DropTable { .. } => "DropTable",
            Self::RenameTable { .. } => "RenameTable",
            Self::AddColumn { .. } => "AddColumn",
            Self::DropColumn { .. } => "DropColumn",
            Self::RenameColumn { .. } => "RenameColumn",
            Self::AlterColumn { .. } => "AlterColumn",
            Self::AddPrimaryKey { .. } => "AddPrimaryKey",
            Self::DropPrimaryKey { .. } => "DropPrimaryKey",
            Self::AddForeignKey { .. } => "AddForeignKey",
            Self::DropForeignKey { .. } => "DropForeignKey",
            Self::CreateIndex { .. } => "CreateIndex",
            Self::DropIndex { .. } => "DropIndex",
            Self::ExecuteRaw { .. } => "ExecuteRaw",
        }
    }

    /// Returns the reverse operation for rollback.
    ///
    /// Returns `None` if the operation is not reversible.
    #[must_use]
    pub fn reverse(&self) -> Option<Self> {
        match self {
            Self::CreateTable { name, .. } => Some(Self::drop_table(name.clone())),

            // Dropped definitions are not recorded.
            Self::DropTable { .. }
            | Self::DropColumn { .. }
            | Self::DropPrimaryKey { .. }
            | Self::DropForeignKey { .. }
            | Self::DropIndex { .. } => None,

            Self::RenameTable { old_name, new_name } => {
                Some(Self::rename_table(new_name.clone(), old_name.clone()))
            }

            Self::AddColumn { table, column } => {
                Some(Self::drop_column(table.clone(), column.name.clone()))
            }

            Self::RenameColumn {
                table,
                old_name,
                new_name,
            } => Some(Self::rename_column(
                table.clone(),
                new_name.clone(),
                old_name.clone(),
            )),

            Self::AlterColumn {
                table,
                column,
                original,
                ..
            } => original.as_ref().map(|orig| Self::AlterColumn {
                table: table.clone(),
                column: column.clone(),
                changes: ColumnChanges::restoring(orig),
                original: None,
            }),

            Self::AddPrimaryKey { table, name, .. } => {
                Some(Self::drop_primary_key(table.clone(), name.clone()))
            }

            Self::AddForeignKey { table, foreign_key } => Some(Self::drop_foreign_key(
                table.clone(),
                foreign_key.name.clone(),
            )),

            Self::CreateIndex { name, table, .. } => {
                Some(Self::drop_index(name.clone(), Some(table.clone())))
            }

            Self::ExecuteRaw { sql, reverse_sql } => {
                reverse_sql.as_ref().map(|reverse| Self::ExecuteRaw {
                    sql: reverse.clone(),
                    reverse_sql: Some(sql.clone()),
                })
            }
        }
    }

    /// Returns true if this operation can be reversed.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        match self {
            Self::CreateTable { .. }
            | Self::RenameTable { .. }
            | Self::AddColumn { .. }
            | Self::RenameColumn { .. }
            | Self::AddPrimaryKey { .. }
            | Self::AddForeignKey { .. }
            | Self::CreateIndex { .. } => true,
            Self::DropTable { .. }
            | Self::DropColumn { .. }
            | Self::DropPrimaryKey { .. }
            | Self::DropForeignKey { .. }
            | Self::DropIndex { .. } => false,
            Self::AlterColumn { original, .. } => original.is_some(),
            Self::ExecuteRaw { reverse_sql, .. } => reverse_sql.is_some(),
        }
    }

    /// Returns a human-readable description of this operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable { name, .. } => format!("Create table '{}'", name),
            Self::DropTable { name } => format!("Drop table '{}'", name),
            Self::RenameTable { old_name, new_name } => {
                format!("Rename table '{}' to '{}'", old_name, new_name)
            }
            Self::AddColumn { table, column } => {
                format!("Add column '{}' to table '{}'", column.name, table)
            }
            Self::DropColumn { table, column } => {
                format!("Drop column '{}' from table '{}'", column, table)
            }
            Self::RenameColumn {
                table,
                old_name,
                new_name,
            } => format!(
                "Rename column '{}' to '{}' in table '{}'",
                old_name, new_name, table
            ),
            Self::AlterColumn { table, column, .. } => {
                format!("Alter column '{}' in table '{}'", column, table)
            }
            Self::AddPrimaryKey { table, name, .. } => {
                format!("Add primary key '{}' to table '{}'", name, table)
            }
            Self::DropPrimaryKey { table, name } => {
                format!("Drop primary key '{}' from table '{}'", name, table)
            }
            Self::AddForeignKey { table, foreign_key } => format!(
                "Add foreign key '{}' to table '{}'",
                foreign_key.name, table
            ),
            Self::DropForeignKey { table, name } => {
                format!("Drop foreign key '{}' from table '{}'", name, table)
            }
            Self::CreateIndex { name, table, .. } => {
                format!("Create index '{}' on table '{}'", name, table)
            }
            Self::DropIndex { name, .. } => format!("Drop index '{}'", name),
            Self::ExecuteRaw { .. } => "Execute raw SQL".to_string(),
        }
    }
}

/// Builder for a CreateTable operation with keys.
pub struct CreateTableBuilder {
    name: String,
    columns: Vec<ColumnSchema>,
    primary_key: Option<PrimaryKeySchema>,
    foreign_keys: Vec<ForeignKeySchema>,
}

impl CreateTableBuilder {
    /// Starts a table definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the named primary key.
    #[must_use]
    pub fn primary_key(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.primary_key = Some(PrimaryKeySchema::new(
            name,
            columns.iter().map(|c| (*c).to_string()).collect(),
        ));
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, foreign_key: ForeignKeySchema) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Builds the operation.
    #[must_use]
    pub fn build(self) -> MigrationOperation {
        MigrationOperation::CreateTable {
            name: self.name,
            columns: self.columns,
            primary_key: self.primary_key,
            foreign_keys: self.foreign_keys,
        }
    }
}

/// Builder for foreign key schema.
pub struct ForeignKeyBuilder {
    schema: ForeignKeySchema,
}

impl ForeignKeyBuilder {
    /// Creates a new foreign key builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: ForeignKeySchema {
                name: name.into(),
                columns: Vec::new(),
                references_table: String::new(),
                references_columns: Vec::new(),
                on_delete: ForeignKeyAction::NoAction,
                on_update: ForeignKeyAction::NoAction,
            },
        }
    }

    /// Sets the local columns.
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.schema.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Sets the referenced table and columns.
    #[must_use]
    pub fn references(mut self, table: impl Into<String>, columns: &[&str]) -> Self {
        self.schema.references_table = table.into();
        self.schema.references_columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.schema.on_delete = action;
        self
    }

    /// Sets the ON UPDATE action.
    #[must_use]
    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.schema.on_update = action;
        self
    }

    /// Builds the foreign key schema.
    #[must_use]
    pub fn build(self) -> ForeignKeySchema {
        self.schema
    }
}

/// Builder for index schema.
pub struct IndexBuilder {
    schema: IndexSchema,
}

impl IndexBuilder {
    /// Creates a new index builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: IndexSchema {
                name: name.into(),
                columns: Vec::new(),
                unique: false,
                condition: None,
            },
        }
    }

    /// Sets the columns to index.
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.schema.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Makes this a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.schema.unique = true;
        self
    }

    /// Sets a partial index condition.
    #[must_use]
    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.schema.condition = Some(condition.into());
        self
    }

    /// Builds the index schema.
    #[must_use]
    pub fn build(self) -> IndexSchema {
        self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_reverse() {
        let op = CreateTableBuilder::new("Status")
            .column(ColumnSchema::new("Id", SqlType::Integer).identity())
            .column(ColumnSchema::new("Name", SqlType::Varchar(50)).not_null())
            .primary_key("PK_Status", &["Id"])
            .build();

        match op.reverse().unwrap() {
            MigrationOperation::DropTable { name } => assert_eq!(name, "Status"),
            other => panic!("Expected DropTable, got {:?}", other),
        }
    }

    #[test]
    fn test_rename_reverses_swap_names() {
        let op = MigrationOperation::rename_table("Barrel", "Cask");
        assert_eq!(
            op.reverse().unwrap(),
            MigrationOperation::rename_table("Cask", "Barrel")
        );

        let op = MigrationOperation::rename_column("Cask", "Vol", "Volume");
        assert_eq!(
            op.reverse().unwrap(),
            MigrationOperation::rename_column("Cask", "Volume", "Vol")
        );
    }

    #[test]
    fn test_add_column_reverse() {
        let op =
            MigrationOperation::add_column("T", ColumnSchema::new("Foo", SqlType::Integer));

        assert_eq!(
            op.reverse().unwrap(),
            MigrationOperation::drop_column("T", "Foo")
        );
    }

    #[test]
    fn test_drops_are_not_reversible() {
        let ops = [
            MigrationOperation::drop_table("T"),
            MigrationOperation::drop_column("T", "Foo"),
            MigrationOperation::drop_primary_key("T", "PK_T"),
            MigrationOperation::drop_foreign_key("T", "FK_T_U"),
            MigrationOperation::drop_index("IX_T_Foo", None),
        ];
        for op in ops {
            assert!(op.reverse().is_none(), "{}", op.description());
            assert!(!op.is_reversible());
        }
    }

    #[test]
    fn test_alter_column_reverse_restores_original() {
        let original = ColumnSchema::new("Foo", SqlType::Integer);
        let op = MigrationOperation::alter_column(
            "T",
            "Foo",
            ColumnChanges::new()
                .set_nullable(false)
                .set_default(DefaultValue::Integer(0)),
        );
        assert!(!op.is_reversible());

        let op = op.with_original(original.clone());
        assert!(op.is_reversible());
        match op.reverse().unwrap() {
            MigrationOperation::AlterColumn {
                table,
                column,
                changes,
                original,
            } => {
                assert_eq!(table, "T");
                assert_eq!(column, "Foo");
                assert_eq!(changes.nullable, Some(true));
                assert_eq!(changes.default, Some(DefaultValue::None));
                assert!(original.is_none());
            }
            other => panic!("Expected AlterColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_raw_reversible() {
        let op = MigrationOperation::execute_raw(
            "UPDATE Status SET Name = 'Active' WHERE Name = 'Live'",
            Some("UPDATE Status SET Name = 'Live' WHERE Name = 'Active'".to_string()),
        );

        assert!(op.is_reversible());
        match op.reverse().unwrap() {
            MigrationOperation::ExecuteRaw { sql, reverse_sql } => {
                assert_eq!(sql, "UPDATE Status SET Name = 'Live' WHERE Name = 'Active'");
                assert!(reverse_sql.is_some());
            }
            other => panic!("Expected ExecuteRaw, got {:?}", other),
        }

        assert!(!MigrationOperation::execute_raw("DELETE FROM Status", None).is_reversible());
    }

    #[test]
    fn test_column_changes_apply_to() {
        let column = ColumnSchema::new("Foo", SqlType::Integer);
        let changes = ColumnChanges::new()
            .set_nullable(false)
            .set_default(DefaultValue::Integer(0));

        let changed = changes.apply_to(&column);
        assert!(!changed.nullable);
        assert_eq!(changed.default, DefaultValue::Integer(0));
        assert_eq!(changed.sql_type, SqlType::Integer);
    }

    #[test]
    fn test_operation_json_shape() {
        let json = r#"{
            "op": "add_column",
            "table": "T",
            "column": {"name": "Foo", "sql_type": "integer"}
        }"#;
        let op: MigrationOperation = serde_json::from_str(json).unwrap();
        assert_eq!(op.kind(), "AddColumn");
        assert_eq!(
            op,
            MigrationOperation::add_column("T", ColumnSchema::new("Foo", SqlType::Integer))
        );
    }

    #[test]
    fn test_foreign_key_builder() {
        let fk = ForeignKeyBuilder::new("FK_Cask_Status")
            .columns(&["StatusId"])
            .references("Status", &["Id"])
            .on_delete(ForeignKeyAction::Cascade)
            .build();

        assert_eq!(fk.name, "FK_Cask_Status");
        assert_eq!(fk.columns, vec!["StatusId"]);
        assert_eq!(fk.references_table, "Status");
        assert_eq!(fk.on_delete, ForeignKeyAction::Cascade);
        assert_eq!(fk.on_update, ForeignKeyAction::NoAction);
    }
}
