//! Live schema introspection.
//!
//! Reads the SQLite catalog back into the same [`DatabaseSchema`] model that
//! operations are written in, so plans can be made against what is actually
//! there and drift can be detected.

use std::collections::BTreeMap;

use regex::Regex;
use sqlx::sqlite::SqliteConnection;

use crate::dialect::MigrationDialect;
use crate::error::{MigrateError, Result};
use crate::schema::{
    ColumnSchema, DatabaseSchema, DefaultValue, ForeignKeyAction, ForeignKeySchema, IndexSchema,
    PrimaryKeySchema, SqlType, TableSchema,
};

type ColumnRow = (String, String, i64, Option<String>, i64);
type IndexRow = (String, i64, String, i64);
type ForeignKeyRow = (i64, i64, String, String, Option<String>, String, String);

/// Patterns used to recover what the pragmas do not report.
struct CatalogPatterns {
    primary_key: Regex,
    foreign_key: Regex,
    partial: Regex,
    autoincrement: Regex,
    check: Regex,
    generated: Regex,
    without_rowid: Regex,
}

fn pattern(source: &str) -> Result<Regex> {
    Regex::new(source).map_err(|e| MigrateError::InvalidState(format!("catalog pattern: {}", e)))
}

impl CatalogPatterns {
    fn new() -> Result<Self> {
        Ok(Self {
            primary_key: pattern(r#"(?i)CONSTRAINT\s+"((?:[^"]|"")+)"\s+PRIMARY\s+KEY"#)?,
            foreign_key: pattern(
                r#"(?i)CONSTRAINT\s+"((?:[^"]|"")+)"\s+FOREIGN\s+KEY\s*\(([^)]*)\)"#,
            )?,
            partial: pattern(r"(?is)\bWHERE\s+(.*)$")?,
            autoincrement: pattern(r"(?i)\bAUTOINCREMENT\b")?,
            check: pattern(r"(?i)\bCHECK\s*\(")?,
            generated: pattern(r"(?i)\bGENERATED\s+ALWAYS\b|\bAS\s*\(")?,
            without_rowid: pattern(r"(?i)\bWITHOUT\s+ROWID\b")?,
        })
    }

    /// Describes the first construct in `sql` the schema model cannot hold.
    fn unmodeled(&self, sql: &str) -> Option<String> {
        if self.check.is_match(sql) {
            Some("a CHECK constraint".to_string())
        } else if self.generated.is_match(sql) {
            Some("a generated column".to_string())
        } else if self.without_rowid.is_match(sql) {
            Some("WITHOUT ROWID".to_string())
        } else {
            None
        }
    }
}

fn unquote(identifier: &str) -> String {
    let trimmed = identifier.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .replace("\"\"", "\"")
}

/// Parses a catalog default (`dflt_value`) back into the model.
pub(crate) fn parse_default(raw: &str) -> DefaultValue {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("NULL") {
        return DefaultValue::Null;
    }
    if let Some(inner) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return DefaultValue::String(inner.replace("''", "'"));
    }
    if let Ok(i) = raw.parse::<i64>() {
        return DefaultValue::Integer(i);
    }
    let numeric = raw
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if numeric {
        if let Ok(f) = raw.parse::<f64>() {
            return DefaultValue::Float(f);
        }
    }
    DefaultValue::Expression(raw.to_string())
}

/// Reads every user table except `excluded` into a schema, sorted by name.
pub async fn introspect<D: MigrationDialect + ?Sized>(
    conn: &mut SqliteConnection,
    dialect: &D,
    excluded: &[String],
) -> Result<DatabaseSchema> {
    let patterns = CatalogPatterns::new()?;
    let tables: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT name, sql FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut schema = DatabaseSchema::new();
    for (name, sql) in tables {
        if excluded.contains(&name) {
            continue;
        }
        let table = introspect_table(conn, dialect, &patterns, &name, sql.as_deref().unwrap_or(""))
            .await?;
        schema.tables.push(table);
    }
    Ok(schema)
}

async fn introspect_table<D: MigrationDialect + ?Sized>(
    conn: &mut SqliteConnection,
    dialect: &D,
    patterns: &CatalogPatterns,
    name: &str,
    sql: &str,
) -> Result<TableSchema> {
    let mut table = TableSchema::new(name);
    table.unmodeled = patterns.unmodeled(sql);

    let rows: Vec<ColumnRow> = sqlx::query_as(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )
    .bind(name)
    .fetch_all(&mut *conn)
    .await?;

    let mut key_columns: Vec<(i64, String)> = Vec::new();
    for (column, declared, not_null, default, pk) in rows {
        let sql_type = dialect.parse_type(&declared);
        let default = match (&sql_type, default) {
            // The token default is implied by the type.
            (SqlType::RowVersion, _) | (_, None) => DefaultValue::None,
            (_, Some(raw)) => parse_default(&raw),
        };
        if pk > 0 {
            key_columns.push((pk, column.clone()));
        }
        table.columns.push(ColumnSchema {
            name: column,
            sql_type,
            nullable: not_null == 0,
            default,
            auto_increment: false,
            unique: false,
        });
    }

    if !key_columns.is_empty() {
        key_columns.sort();
        let columns: Vec<String> = key_columns.into_iter().map(|(_, c)| c).collect();
        if columns.len() == 1 && patterns.autoincrement.is_match(sql) {
            if let Some(column) = table.get_column_mut(&columns[0]) {
                column.auto_increment = true;
            }
        }
        let pk_name = patterns
            .primary_key
            .captures(sql)
            .map_or_else(|| format!("PK_{}", name), |c| unquote(&c[1]));
        table.primary_key = Some(PrimaryKeySchema::new(pk_name, columns));
    }

    let indexes: Vec<IndexRow> = sqlx::query_as(
        "SELECT name, \"unique\", origin, partial FROM pragma_index_list(?1) ORDER BY name",
    )
    .bind(name)
    .fetch_all(&mut *conn)
    .await?;

    for (index_name, unique, origin, partial) in indexes {
        if origin == "pk" {
            continue;
        }
        let columns: Vec<Option<String>> =
            sqlx::query_scalar("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
                .bind(&index_name)
                .fetch_all(&mut *conn)
                .await?;
        let Some(columns) = columns.into_iter().collect::<Option<Vec<String>>>() else {
            table.unmodeled.get_or_insert_with(|| "an expression index".to_string());
            continue;
        };

        if origin == "u" {
            match columns.as_slice() {
                [single] => {
                    if let Some(column) = table.get_column_mut(single) {
                        column.unique = true;
                    }
                }
                _ => {
                    table
                        .unmodeled
                        .get_or_insert_with(|| "a composite UNIQUE constraint".to_string());
                }
            }
            continue;
        }

        let condition = if partial == 1 {
            let index_sql: Option<String> = sqlx::query_scalar(
                "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = ?1",
            )
            .bind(&index_name)
            .fetch_optional(&mut *conn)
            .await?
            .flatten();
            index_sql
                .as_deref()
                .and_then(|s| patterns.partial.captures(s))
                .map(|c| c[1].trim().to_string())
        } else {
            None
        };

        table.indexes.push(IndexSchema {
            name: index_name,
            columns,
            unique: unique == 1,
            condition,
        });
    }

    let fk_rows: Vec<ForeignKeyRow> = sqlx::query_as(
        "SELECT id, seq, \"table\", \"from\", \"to\", on_update, on_delete \
         FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
    )
    .bind(name)
    .fetch_all(&mut *conn)
    .await?;

    let named: Vec<(String, Vec<String>)> = patterns
        .foreign_key
        .captures_iter(sql)
        .map(|c| (unquote(&c[1]), c[2].split(',').map(unquote).collect()))
        .collect();

    let mut grouped: BTreeMap<i64, ForeignKeySchema> = BTreeMap::new();
    for (id, _seq, target, from, to, on_update, on_delete) in fk_rows {
        let fk = grouped.entry(id).or_insert_with(|| ForeignKeySchema {
            name: String::new(),
            columns: Vec::new(),
            references_table: target,
            references_columns: Vec::new(),
            on_delete: ForeignKeyAction::from_sql(&on_delete),
            on_update: ForeignKeyAction::from_sql(&on_update),
        });
        fk.columns.push(from);
        fk.references_columns.push(to.unwrap_or_default());
    }
    for (id, mut fk) in grouped {
        fk.name = named
            .iter()
            .find(|(_, cols)| *cols == fk.columns)
            .map_or_else(|| format!("FK_{}_{}", name, id), |(n, _)| n.clone());
        table.foreign_keys.push(fk);
    }
    table.foreign_keys.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::operations::{CreateTableBuilder, ForeignKeyBuilder, IndexBuilder, MigrationOperation};
    use crate::state::SchemaState;
    use pretty_assertions::assert_eq;
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    #[test]
    fn test_parse_default() {
        assert_eq!(parse_default("NULL"), DefaultValue::Null);
        assert_eq!(parse_default("0"), DefaultValue::Integer(0));
        assert_eq!(parse_default("-12"), DefaultValue::Integer(-12));
        assert_eq!(parse_default("1.5"), DefaultValue::Float(1.5));
        assert_eq!(
            parse_default("'it''s'"),
            DefaultValue::String("it's".to_string())
        );
        assert_eq!(
            parse_default("CURRENT_TIMESTAMP"),
            DefaultValue::Expression("CURRENT_TIMESTAMP".to_string())
        );
        assert_eq!(
            parse_default("NaN"),
            DefaultValue::Expression("NaN".to_string())
        );
    }

    #[tokio::test]
    async fn test_introspection_matches_replay() {
        let pool = create_test_pool().await;
        let dialect = SqliteDialect::new();

        let ops = vec![
            CreateTableBuilder::new("Status")
                .column(ColumnSchema::new("Id", SqlType::Integer).identity())
                .column(ColumnSchema::new("Name", SqlType::Varchar(50)).not_null())
                .column(
                    ColumnSchema::new("Code", SqlType::Char(3))
                        .not_null()
                        .unique()
                        .default(DefaultValue::String("NEW".to_string())),
                )
                .primary_key("PK_Status", &["Id"])
                .build(),
            CreateTableBuilder::new("CaskStatus")
                .column(ColumnSchema::new("CaskId", SqlType::BigInt).not_null())
                .column(ColumnSchema::new("StatusId", SqlType::Integer).not_null())
                .column(ColumnSchema::new("ChangedAt", SqlType::DateTimeOffset(Some(7))))
                .column(ColumnSchema::new("RowVersion", SqlType::RowVersion).not_null())
                .primary_key("PK_CaskStatus", &["StatusId", "CaskId"])
                .foreign_key(
                    ForeignKeyBuilder::new("FK_CaskStatus_Status_StatusId")
                        .columns(&["StatusId"])
                        .references("Status", &["Id"])
                        .on_delete(ForeignKeyAction::Cascade)
                        .build(),
                )
                .build(),
            MigrationOperation::create_index(
                "CaskStatus",
                IndexBuilder::new("IX_CaskStatus_ChangedAt")
                    .columns(&["ChangedAt"])
                    .condition("\"ChangedAt\" IS NOT NULL")
                    .build(),
            ),
        ];

        let mut state = SchemaState::new();
        let mut conn = pool.acquire().await.unwrap();
        for op in &ops {
            let before = state.schema().clone();
            state.apply_operation(op).unwrap();
            for sql in dialect.generate_sql(op, &before, state.schema()).unwrap() {
                sqlx::query(&sql).execute(&mut *conn).await.unwrap();
            }
        }

        let live = introspect(&mut conn, &dialect, &[]).await.unwrap();
        let mut expected = state.into_schema();
        expected.tables.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(live, expected);
    }

    #[tokio::test]
    async fn test_unmodeled_and_excluded_tables() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("CREATE TABLE \"Checked\" (\"A\" INTEGER CHECK (\"A\" > 0))")
            .execute(&mut *conn)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE cask_migrations (migration_id TEXT PRIMARY KEY)")
            .execute(&mut *conn)
            .await
            .unwrap();

        let schema = introspect(
            &mut conn,
            &SqliteDialect::new(),
            &["cask_migrations".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(schema.tables.len(), 1);
        assert_eq!(
            schema.tables[0].unmodeled.as_deref(),
            Some("a CHECK constraint")
        );
    }
}
