//! SQLite dialect for migrations.
//!
//! SQLite has limited ALTER TABLE support, so some operations require
//! the "table recreation" strategy: create a new table, copy data,
//! drop the old table, rename the new table, then recreate indexes and
//! triggers.

use crate::operations::MigrationOperation;
use crate::schema::{
    ColumnSchema, DatabaseSchema, DefaultValue, ForeignKeyAction, ForeignKeySchema, IndexSchema,
    SqlType, TableSchema,
};

use super::{MigrationDialect, Unsupported};

/// Prefix of the replacement table built during a rebuild.
pub(crate) const REBUILD_PREFIX: &str = "_cask_new_";

const ROW_VERSION_DEFAULT: &str = "(randomblob(8))";

/// SQLite migration dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Generates SQL for creating `table` under the name `name`.
    fn create_table_sql(&self, name: &str, table: &TableSchema) -> String {
        let identity = table.identity_column().map(|c| c.name.as_str());

        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                let mut def = self.column_definition(c);
                if Some(c.name.as_str()) == identity {
                    if let Some(pk) = &table.primary_key {
                        def.push_str(&format!(
                            " CONSTRAINT {} PRIMARY KEY AUTOINCREMENT",
                            self.quote_identifier(&pk.name)
                        ));
                    }
                }
                def
            })
            .collect();

        if let (Some(pk), None) = (&table.primary_key, identity) {
            defs.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.quote_identifier(&pk.name),
                self.quote_list(&pk.columns)
            ));
        }

        for fk in &table.foreign_keys {
            defs.push(self.foreign_key_sql(fk));
        }

        format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(name),
            defs.join(",\n  ")
        )
    }

    fn foreign_key_sql(&self, fk: &ForeignKeySchema) -> String {
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_identifier(&fk.name),
            self.quote_list(&fk.columns),
            self.quote_identifier(&fk.references_table),
            self.quote_list(&fk.references_columns)
        );
        if fk.on_delete != ForeignKeyAction::NoAction {
            sql.push_str(" ON DELETE ");
            sql.push_str(fk.on_delete.to_sql());
        }
        if fk.on_update != ForeignKeyAction::NoAction {
            sql.push_str(" ON UPDATE ");
            sql.push_str(fk.on_update.to_sql());
        }
        sql
    }

    /// Generates SQL for creating an index.
    fn create_index_sql(&self, table: &str, index: &IndexSchema) -> String {
        let mut sql = String::from("CREATE ");
        if index.unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");
        sql.push_str(&self.quote_identifier(&index.name));
        sql.push_str(" ON ");
        sql.push_str(&self.quote_identifier(table));
        sql.push_str(" (");
        sql.push_str(&self.quote_list(&index.columns));
        sql.push(')');

        if let Some(cond) = &index.condition {
            sql.push_str(" WHERE ");
            sql.push_str(cond);
        }

        sql
    }

    /// Name of the row-version trigger of `table.column`.
    ///
    /// The table name is length-prefixed so that `A_B.C` and `A.B_C` differ.
    fn row_version_trigger_name(table: &str, column: &str) -> String {
        format!("rowversion_{}_{}_{}", table.len(), table, column)
    }

    /// Trigger that gives a row a fresh token whenever it is updated.
    fn row_version_trigger_sql(&self, table: &str, column: &str) -> String {
        let t = self.quote_identifier(table);
        let c = self.quote_identifier(column);
        format!(
            "CREATE TRIGGER {} AFTER UPDATE ON {} FOR EACH ROW WHEN NEW.{c} IS OLD.{c} \
             BEGIN UPDATE {} SET {c} = randomblob(8) WHERE rowid = NEW.rowid; END",
            self.quote_identifier(&Self::row_version_trigger_name(table, column)),
            t,
            t,
            c = c
        )
    }

    /// Moves a row-version trigger to the name derived from its new table or column.
    fn rename_row_version_trigger(&self, old: (&str, &str), new: (&str, &str)) -> [String; 2] {
        [
            format!(
                "DROP TRIGGER IF EXISTS {}",
                self.quote_identifier(&Self::row_version_trigger_name(old.0, old.1))
            ),
            self.row_version_trigger_sql(new.0, new.1),
        ]
    }

    fn row_version_triggers<'a>(
        &'a self,
        table: &'a TableSchema,
    ) -> impl Iterator<Item = String> + 'a {
        table
            .columns
            .iter()
            .filter(|c| c.is_row_version())
            .map(move |c| self.row_version_trigger_sql(&table.name, &c.name))
    }

    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote_identifier(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Rebuilds `before` into the shape of `after`.
    fn rebuild_sql(
        &self,
        kind: &'static str,
        before: &TableSchema,
        after: &TableSchema,
    ) -> Result<Vec<String>, Unsupported> {
        if let Some(construct) = &before.unmodeled {
            return Err(Unsupported::new(
                kind,
                format!(
                    "table '{}' uses {} which a table rebuild cannot preserve",
                    before.name, construct
                ),
            ));
        }

        let temp = format!("{}{}", REBUILD_PREFIX, after.name);
        let mut sql = vec![self.create_table_sql(&temp, after)];

        let mut targets = Vec::new();
        let mut sources = Vec::new();
        for column in &after.columns {
            let Some(source) = before.get_column(&column.name) else {
                continue;
            };
            // A fresh row-version column takes its default instead of old values.
            if column.is_row_version() && !source.is_row_version() {
                continue;
            }
            let quoted = self.quote_identifier(&column.name);
            let fill = match &column.default {
                DefaultValue::None | DefaultValue::Null => None,
                other => other.to_sql(),
            };
            let expr = match fill {
                Some(fill) if !column.nullable && source.nullable => {
                    format!("COALESCE({}, {})", quoted, fill)
                }
                _ => quoted.clone(),
            };
            targets.push(quoted);
            sources.push(expr);
        }
        if !targets.is_empty() {
            sql.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.quote_identifier(&temp),
                targets.join(", "),
                sources.join(", "),
                self.quote_identifier(&before.name)
            ));
        }

        sql.push(format!("DROP TABLE {}", self.quote_identifier(&before.name)));
        // Views and triggers over the old table are not re-parsed by a legacy rename.
        sql.push("PRAGMA legacy_alter_table = ON".to_string());
        sql.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(&temp),
            self.quote_identifier(&after.name)
        ));
        sql.push("PRAGMA legacy_alter_table = OFF".to_string());
        for index in &after.indexes {
            sql.push(self.create_index_sql(&after.name, index));
        }
        sql.extend(self.row_version_triggers(after));
        Ok(sql)
    }

    fn check_column(&self, kind: &'static str, column: &ColumnSchema) -> Result<(), Unsupported> {
        if column.auto_increment && !column.sql_type.is_integer() {
            return Err(Unsupported::new(
                kind,
                format!(
                    "identity column '{}' must be an integer, not {}",
                    column.name,
                    self.type_name(&column.sql_type)
                ),
            ));
        }
        if column.is_row_version() {
            if column.nullable {
                return Err(Unsupported::new(
                    kind,
                    format!("row-version column '{}' cannot be nullable", column.name),
                ));
            }
            if column.default.is_set() {
                return Err(Unsupported::new(
                    kind,
                    format!("row-version column '{}' cannot carry a default", column.name),
                ));
            }
        }
        Ok(())
    }

    /// Checks the shape of a table as it will exist after an operation.
    fn check_table(&self, kind: &'static str, table: &TableSchema) -> Result<(), Unsupported> {
        for column in &table.columns {
            self.check_column(kind, column)?;
        }

        let identities: Vec<&ColumnSchema> =
            table.columns.iter().filter(|c| c.auto_increment).collect();
        match identities.as_slice() {
            [] => Ok(()),
            [identity] => {
                let sole_key = table
                    .primary_key
                    .as_ref()
                    .is_some_and(|pk| pk.columns.len() == 1 && pk.columns[0] == identity.name);
                if sole_key {
                    Ok(())
                } else {
                    Err(Unsupported::new(
                        kind,
                        format!(
                            "identity column '{}' must be the sole primary key column of '{}'",
                            identity.name, table.name
                        ),
                    ))
                }
            }
            _ => Err(Unsupported::new(
                kind,
                format!("table '{}' declares more than one identity column", table.name),
            )),
        }
    }

    fn add_column_needs_rebuild(column: &ColumnSchema) -> bool {
        column.unique
            || column.auto_increment
            || column.is_row_version()
            || matches!(column.default, DefaultValue::Expression(_))
            || (!column.nullable && !column.default.is_set())
    }
}

fn table<'a>(
    schema: &'a DatabaseSchema,
    name: &str,
    kind: &'static str,
) -> Result<&'a TableSchema, Unsupported> {
    schema
        .get_table(name)
        .ok_or_else(|| Unsupported::new(kind, format!("table '{}' is not in the planned schema", name)))
}

impl MigrationDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn validate(&self, operation: &MigrationOperation) -> Result<(), Unsupported> {
        let kind = operation.kind();
        match operation {
            MigrationOperation::CreateTable { name, columns, .. } => {
                if name.starts_with(REBUILD_PREFIX) {
                    return Err(Unsupported::new(
                        kind,
                        format!("table names starting with '{}' are reserved", REBUILD_PREFIX),
                    ));
                }
                columns.iter().try_for_each(|c| self.check_column(kind, c))
            }
            MigrationOperation::AddColumn { column, .. } => self.check_column(kind, column),
            MigrationOperation::ExecuteRaw { sql, .. } if sql.trim().is_empty() => {
                Err(Unsupported::new(kind, "empty SQL statement"))
            }
            _ => Ok(()),
        }
    }

    fn generate_sql(
        &self,
        operation: &MigrationOperation,
        before: &DatabaseSchema,
        after: &DatabaseSchema,
    ) -> Result<Vec<String>, Unsupported> {
        let kind = operation.kind();
        match operation {
            MigrationOperation::CreateTable { name, .. } => {
                let created = table(after, name, kind)?;
                self.check_table(kind, created)?;
                let mut sql = vec![self.create_table_sql(name, created)];
                sql.extend(self.row_version_triggers(created));
                Ok(sql)
            }

            MigrationOperation::DropTable { name } => {
                Ok(vec![format!("DROP TABLE {}", self.quote_identifier(name))])
            }

            MigrationOperation::RenameTable { old_name, new_name } => {
                let mut sql = vec![format!(
                    "ALTER TABLE {} RENAME TO {}",
                    self.quote_identifier(old_name),
                    self.quote_identifier(new_name)
                )];
                let columns = after.get_table(new_name).map_or(&[][..], |t| t.columns.as_slice());
                for column in columns.iter().filter(|c| c.is_row_version()) {
                    sql.extend(self.rename_row_version_trigger(
                        (old_name.as_str(), column.name.as_str()),
                        (new_name.as_str(), column.name.as_str()),
                    ));
                }
                Ok(sql)
            }

            MigrationOperation::AddColumn {
                table: name,
                column,
            } => {
                let changed = table(after, name, kind)?;
                self.check_table(kind, changed)?;
                if Self::add_column_needs_rebuild(column) {
                    self.rebuild_sql(kind, table(before, name, kind)?, changed)
                } else {
                    Ok(vec![format!(
                        "ALTER TABLE {} ADD COLUMN {}",
                        self.quote_identifier(name),
                        self.column_definition(column)
                    )])
                }
            }

            MigrationOperation::DropColumn {
                table: name,
                column,
            } => {
                let original = table(before, name, kind)?;
                let constrained = original
                    .get_column(column)
                    .is_some_and(|c| c.unique || c.is_row_version());
                if constrained {
                    self.rebuild_sql(kind, original, table(after, name, kind)?)
                } else {
                    Ok(vec![format!(
                        "ALTER TABLE {} DROP COLUMN {}",
                        self.quote_identifier(name),
                        self.quote_identifier(column)
                    )])
                }
            }

            MigrationOperation::RenameColumn {
                table: name,
                old_name,
                new_name,
            } => {
                let mut sql = vec![format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    self.quote_identifier(name),
                    self.quote_identifier(old_name),
                    self.quote_identifier(new_name)
                )];
                let row_version = after
                    .get_table(name)
                    .and_then(|t| t.get_column(new_name))
                    .is_some_and(ColumnSchema::is_row_version);
                if row_version {
                    sql.extend(self.rename_row_version_trigger(
                        (name.as_str(), old_name.as_str()),
                        (name.as_str(), new_name.as_str()),
                    ));
                }
                Ok(sql)
            }

            MigrationOperation::AlterColumn { table: name, .. }
            | MigrationOperation::AddPrimaryKey { table: name, .. }
            | MigrationOperation::DropPrimaryKey { table: name, .. }
            | MigrationOperation::AddForeignKey { table: name, .. }
            | MigrationOperation::DropForeignKey { table: name, .. } => {
                let changed = table(after, name, kind)?;
                self.check_table(kind, changed)?;
                self.rebuild_sql(kind, table(before, name, kind)?, changed)
            }

            MigrationOperation::CreateIndex {
                name, table: owner, ..
            } => {
                let indexed = table(after, owner, kind)?;
                let index = indexed
                    .indexes
                    .iter()
                    .find(|i| i.name == *name)
                    .ok_or_else(|| {
                        Unsupported::new(kind, format!("index '{}' is not in the planned schema", name))
                    })?;
                Ok(vec![self.create_index_sql(owner, index)])
            }

            MigrationOperation::DropIndex { name, .. } => {
                Ok(vec![format!("DROP INDEX {}", self.quote_identifier(name))])
            }

            MigrationOperation::ExecuteRaw { sql, .. } => Ok(vec![sql.clone()]),
        }
    }

    fn type_name(&self, sql_type: &SqlType) -> String {
        let with_precision = |name: &str, precision: &Option<u8>| match precision {
            Some(p) => format!("{}({})", name, p),
            None => name.to_string(),
        };
        match sql_type {
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Real => "FLOAT".to_string(),
            SqlType::Double => "DOUBLE".to_string(),
            SqlType::Decimal(p, s) => format!("DECIMAL({},{})", p, s),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Varchar(n) => format!("VARCHAR({})", n),
            SqlType::Char(n) => format!("CHAR({})", n),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time(p) => with_precision("TIME", p),
            SqlType::DateTime(p) => with_precision("DATETIME", p),
            SqlType::DateTimeOffset(p) => with_precision("DATETIMEOFFSET", p),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Binary(n) => format!("BINARY({})", n),
            SqlType::Uuid => "UUID".to_string(),
            SqlType::RowVersion => "ROWVERSION".to_string(),
            SqlType::Custom(name) => name.clone(),
        }
    }

    fn parse_type(&self, declared: &str) -> SqlType {
        let declared = declared.trim();
        let upper = declared.to_ascii_uppercase();
        let (base, args) = match upper.split_once('(') {
            Some((base, rest)) => {
                let parsed: Option<Vec<u32>> = rest
                    .trim_end()
                    .strip_suffix(')')
                    .and_then(|inner| inner.split(',').map(|a| a.trim().parse().ok()).collect());
                (base.trim(), parsed)
            }
            None => (upper.as_str(), Some(Vec::new())),
        };
        let custom = || SqlType::Custom(declared.to_string());
        let Some(args) = args else {
            return custom();
        };
        let precision = |p: u32| u8::try_from(p).ok();

        match (base, args.as_slice()) {
            ("SMALLINT", []) => SqlType::SmallInt,
            ("INTEGER" | "INT", []) => SqlType::Integer,
            ("BIGINT", []) => SqlType::BigInt,
            ("FLOAT" | "REAL", []) => SqlType::Real,
            ("DOUBLE", []) => SqlType::Double,
            ("DECIMAL", [p, s]) => match (precision(*p), precision(*s)) {
                (Some(p), Some(s)) => SqlType::Decimal(p, s),
                _ => custom(),
            },
            ("BOOLEAN", []) => SqlType::Boolean,
            ("TEXT", []) => SqlType::Text,
            ("VARCHAR", [n]) => SqlType::Varchar(*n),
            ("CHAR", [n]) => SqlType::Char(*n),
            ("DATE", []) => SqlType::Date,
            ("TIME", []) => SqlType::Time(None),
            ("TIME", [p]) => precision(*p).map_or_else(custom, |p| SqlType::Time(Some(p))),
            ("DATETIME", []) => SqlType::DateTime(None),
            ("DATETIME", [p]) => precision(*p).map_or_else(custom, |p| SqlType::DateTime(Some(p))),
            ("DATETIMEOFFSET", []) => SqlType::DateTimeOffset(None),
            ("DATETIMEOFFSET", [p]) => {
                precision(*p).map_or_else(custom, |p| SqlType::DateTimeOffset(Some(p)))
            }
            ("BLOB", []) => SqlType::Blob,
            ("BINARY", [n]) => SqlType::Binary(*n),
            ("UUID", []) => SqlType::Uuid,
            ("ROWVERSION", []) => SqlType::RowVersion,
            _ => custom(),
        }
    }

    fn column_definition(&self, column: &ColumnSchema) -> String {
        // AUTOINCREMENT is only accepted on a column declared exactly INTEGER.
        let type_name = if column.auto_increment {
            "INTEGER".to_string()
        } else {
            self.type_name(&column.sql_type)
        };
        let mut parts = vec![self.quote_identifier(&column.name), type_name];

        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if column.unique {
            parts.push("UNIQUE".to_string());
        }
        if column.is_row_version() {
            parts.push(format!("DEFAULT {}", ROW_VERSION_DEFAULT));
        } else if let Some(default_sql) = column.default.to_sql() {
            parts.push(format!("DEFAULT {}", default_sql));
        }

        parts.join(" ")
    }

    fn pre_migration_sql(&self) -> Vec<String> {
        vec!["PRAGMA foreign_keys = OFF".to_string()]
    }

    fn post_migration_sql(&self) -> Vec<String> {
        vec![
            "PRAGMA legacy_alter_table = OFF".to_string(),
            "PRAGMA foreign_keys = ON".to_string(),
        ]
    }

    fn integrity_check_sql(&self) -> Option<&'static str> {
        Some("PRAGMA foreign_key_check")
    }
}
