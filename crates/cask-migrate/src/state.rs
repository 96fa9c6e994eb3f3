//! Schema state replay.
//!
//! Replays migration operations against an in-memory [`DatabaseSchema`].
//! The runner uses it to plan table rebuilds over the live schema, to render
//! dry-run scripts, and to compute the expected schema for drift checks.

use crate::descriptor::MigrationDescriptor;
use crate::error::{MigrateError, Result};
use crate::operations::MigrationOperation;
use crate::schema::{DatabaseSchema, IndexSchema, PrimaryKeySchema, TableSchema};

/// Reconstructs database schema by replaying operations.
#[derive(Debug, Default, Clone)]
pub struct SchemaState {
    schema: DatabaseSchema,
}

fn missing_table(name: &str) -> MigrateError {
    MigrateError::InvalidState(format!("Table '{}' does not exist", name))
}

fn missing_column(column: &str, table: &str) -> MigrateError {
    MigrateError::InvalidState(format!(
        "Column '{}' does not exist in table '{}'",
        column, table
    ))
}

impl SchemaState {
    /// Creates a new empty schema state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing schema (usually an introspected one).
    #[must_use]
    pub fn from_schema(schema: DatabaseSchema) -> Self {
        Self { schema }
    }

    /// Returns the current schema.
    #[must_use]
    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    /// Consumes and returns the schema.
    #[must_use]
    pub fn into_schema(self) -> DatabaseSchema {
        self.schema
    }

    /// Applies a migration's `up` operations.
    pub fn apply_migration(&mut self, migration: &MigrationDescriptor) -> Result<()> {
        for operation in migration.up() {
            self.apply_operation(operation)?;
        }
        Ok(())
    }

    /// Reconstructs schema from migrations applied in order.
    pub fn from_migrations<'a>(
        migrations: impl IntoIterator<Item = &'a MigrationDescriptor>,
    ) -> Result<Self> {
        let mut state = Self::new();
        for migration in migrations {
            state.apply_migration(migration)?;
        }
        Ok(state)
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableSchema> {
        self.schema
            .get_table_mut(name)
            .ok_or_else(|| missing_table(name))
    }

    /// Applies a single operation to the schema state.
    pub fn apply_operation(&mut self, operation: &MigrationOperation) -> Result<()> {
        match operation {
            MigrationOperation::CreateTable {
                name,
                columns,
                primary_key,
                foreign_keys,
            } => {
                if self.schema.get_table(name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Table '{}' already exists",
                        name
                    )));
                }

                let mut table = TableSchema::new(name.clone());
                for column in columns {
                    if table.get_column(&column.name).is_some() {
                        return Err(MigrateError::InvalidState(format!(
                            "Column '{}' is declared twice in table '{}'",
                            column.name, name
                        )));
                    }
                    table.columns.push(column.clone());
                }
                if let Some(pk) = primary_key {
                    check_columns(&table, &pk.columns)?;
                    table.primary_key = Some(pk.clone());
                }
                self.schema.tables.push(table);
                for fk in foreign_keys {
                    self.add_foreign_key(name, fk)?;
                }
            }

            MigrationOperation::DropTable { name } => {
                let idx = self
                    .schema
                    .tables
                    .iter()
                    .position(|t| t.name == *name)
                    .ok_or_else(|| missing_table(name))?;
                self.schema.tables.remove(idx);
            }

            MigrationOperation::RenameTable { old_name, new_name } => {
                if self.schema.get_table(new_name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Table '{}' already exists",
                        new_name
                    )));
                }
                self.table_mut(old_name)?.name = new_name.clone();
                for t in &mut self.schema.tables {
                    for fk in &mut t.foreign_keys {
                        if fk.references_table == *old_name {
                            fk.references_table = new_name.clone();
                        }
                    }
                }
            }

            MigrationOperation::AddColumn { table, column } => {
                let t = self.table_mut(table)?;
                if t.get_column(&column.name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Column '{}' already exists in table '{}'",
                        column.name, table
                    )));
                }
                t.columns.push(column.clone());
            }

            MigrationOperation::DropColumn { table, column } => {
                let t = self.table_mut(table)?;
                let idx = t
                    .columns
                    .iter()
                    .position(|c| c.name == *column)
                    .ok_or_else(|| missing_column(column, table))?;
                if t.is_constrained(column) {
                    return Err(MigrateError::InvalidState(format!(
                        "Column '{}' in table '{}' is still used by a key or index",
                        column, table
                    )));
                }
                t.columns.remove(idx);
            }

            MigrationOperation::RenameColumn {
                table,
                old_name,
                new_name,
            } => {
                let t = self.table_mut(table)?;
                if t.get_column(new_name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Column '{}' already exists in table '{}'",
                        new_name, table
                    )));
                }
                let col = t
                    .get_column_mut(old_name)
                    .ok_or_else(|| missing_column(old_name, table))?;
                col.name = new_name.clone();

                let rename = |cols: &mut Vec<String>| {
                    for c in cols.iter_mut() {
                        if c == old_name {
                            *c = new_name.clone();
                        }
                    }
                };
                if let Some(pk) = &mut t.primary_key {
                    rename(&mut pk.columns);
                }
                for index in &mut t.indexes {
                    rename(&mut index.columns);
                }
                for fk in &mut t.foreign_keys {
                    rename(&mut fk.columns);
                }
                for other in &mut self.schema.tables {
                    for fk in &mut other.foreign_keys {
                        if fk.references_table == *table {
                            rename(&mut fk.references_columns);
                        }
                    }
                }
            }

            MigrationOperation::AlterColumn {
                table,
                column,
                changes,
                ..
            } => {
                let t = self.table_mut(table)?;
                let col = t
                    .get_column_mut(column)
                    .ok_or_else(|| missing_column(column, table))?;
                *col = changes.apply_to(col);
            }

            MigrationOperation::AddPrimaryKey {
                table,
                name,
                columns,
            } => {
                let t = self.table_mut(table)?;
                if let Some(existing) = &t.primary_key {
                    return Err(MigrateError::InvalidState(format!(
                        "Table '{}' already has primary key '{}'",
                        table, existing.name
                    )));
                }
                check_columns(t, columns)?;
                t.primary_key = Some(PrimaryKeySchema::new(name.clone(), columns.clone()));
            }

            MigrationOperation::DropPrimaryKey { table, name } => {
                let t = self.table_mut(table)?;
                if !t.primary_key.as_ref().is_some_and(|pk| pk.name == *name) {
                    return Err(MigrateError::InvalidState(format!(
                        "Primary key '{}' does not exist on table '{}'",
                        name, table
                    )));
                }
                t.primary_key = None;
            }

            MigrationOperation::AddForeignKey { table, foreign_key } => {
                self.add_foreign_key(table, foreign_key)?;
            }

            MigrationOperation::DropForeignKey { table, name } => {
                let t = self.table_mut(table)?;
                let idx = t
                    .foreign_keys
                    .iter()
                    .position(|fk| fk.name == *name)
                    .ok_or_else(|| {
                        MigrateError::InvalidState(format!(
                            "Foreign key '{}' does not exist in table '{}'",
                            name, table
                        ))
                    })?;
                t.foreign_keys.remove(idx);
            }

            MigrationOperation::CreateIndex {
                name,
                table,
                columns,
                unique,
                condition,
            } => {
                if self.schema.table_for_index(name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Index '{}' already exists",
                        name
                    )));
                }
                let t = self.table_mut(table)?;
                check_columns(t, columns)?;
                t.indexes.push(IndexSchema {
                    name: name.clone(),
                    columns: columns.clone(),
                    unique: *unique,
                    condition: condition.clone(),
                });
            }

            MigrationOperation::DropIndex { name, table } => {
                let owner = self
                    .schema
                    .tables
                    .iter_mut()
                    .filter(|t| table.as_ref().map_or(true, |wanted| t.name == *wanted))
                    .find(|t| t.indexes.iter().any(|i| i.name == *name));
                match owner {
                    Some(t) => t.indexes.retain(|i| i.name != *name),
                    None => {
                        return Err(MigrateError::InvalidState(format!(
                            "Index '{}' does not exist",
                            name
                        )))
                    }
                }
            }

            // Raw SQL is opaque to the replay.
            MigrationOperation::ExecuteRaw { .. } => {}
        }

        Ok(())
    }

    fn add_foreign_key(
        &mut self,
        table: &str,
        foreign_key: &crate::schema::ForeignKeySchema,
    ) -> Result<()> {
        let target = self
            .schema
            .get_table(&foreign_key.references_table)
            .ok_or_else(|| missing_table(&foreign_key.references_table))?;
        check_columns(target, &foreign_key.references_columns)?;
        if foreign_key.columns.len() != foreign_key.references_columns.len() {
            return Err(MigrateError::InvalidState(format!(
                "Foreign key '{}' maps {} column(s) onto {}",
                foreign_key.name,
                foreign_key.columns.len(),
                foreign_key.references_columns.len()
            )));
        }

        let t = self.table_mut(table)?;
        check_columns(t, &foreign_key.columns)?;
        if t.foreign_keys.iter().any(|fk| fk.name == foreign_key.name) {
            return Err(MigrateError::InvalidState(format!(
                "Foreign key '{}' already exists in table '{}'",
                foreign_key.name, table
            )));
        }
        t.foreign_keys.push(foreign_key.clone());
        Ok(())
    }
}

fn check_columns(table: &TableSchema, columns: &[String]) -> Result<()> {
    if columns.is_empty() {
        return Err(MigrateError::InvalidState(format!(
            "Empty column list on table '{}'",
            table.name
        )));
    }
    match columns.iter().find(|c| table.get_column(c).is_none()) {
        Some(column) => Err(missing_column(column, &table.name)),
        None => Ok(()),
    }
}
