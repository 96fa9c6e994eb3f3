//! Loading descriptors and seed plans from JSON files.
//!
//! A migrations directory holds one `*.json` file per descriptor:
//!
//! ```json
//! {
//!   "id": "201904151230451_AddStatus",
//!   "up": [{ "op": "add_column", "table": "Cask", "column": { "name": "Foo", "sql_type": "integer" } }],
//!   "down": [{ "op": "drop_column", "table": "Cask", "column": "Foo" }]
//! }
//! ```
//!
//! `id` defaults to the file stem and `down` is derived when omitted.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::descriptor::{MigrationDescriptor, MigrationSet};
use crate::error::{MigrateError, Result};
use crate::operations::MigrationOperation;
use crate::seed::SeedPlan;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorFile {
    id: Option<String>,
    up: Vec<MigrationOperation>,
    down: Option<Vec<MigrationOperation>>,
}

fn parse_error(path: &Path, message: impl ToString) -> MigrateError {
    MigrateError::ParseError {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Loads one descriptor file.
pub fn load_descriptor(path: &Path) -> Result<MigrationDescriptor> {
    let content = fs::read_to_string(path)?;
    let file: DescriptorFile =
        serde_json::from_str(&content).map_err(|e| parse_error(path, e))?;

    let id = match file.id {
        Some(id) => id,
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| parse_error(path, "file name is not valid UTF-8"))?,
    };

    MigrationDescriptor::from_parts(id, file.up, file.down).map_err(|e| match e {
        MigrateError::Validation(message) => {
            MigrateError::Validation(format!("{}: {}", path.display(), message))
        }
        other => other,
    })
}

/// Loads every `*.json` descriptor in `dir` into an ordered set.
pub fn load_migrations(dir: &Path) -> Result<MigrationSet> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut migrations = Vec::with_capacity(paths.len());
    for path in &paths {
        debug!(path = %path.display(), "Loading migration");
        migrations.push(load_descriptor(path)?);
    }
    MigrationSet::new(migrations)
}

/// Loads a seed plan file.
pub fn load_seed_plan(path: &Path) -> Result<SeedPlan> {
    let content = fs::read_to_string(path)?;
    let plan: SeedPlan = serde_json::from_str(&content).map_err(|e| parse_error(path, e))?;
    plan.validate().map_err(|e| match e {
        MigrateError::Validation(message) => {
            MigrateError::Validation(format!("{}: {}", path.display(), message))
        }
        other => other,
    })?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_migrations_sorted_with_stem_ids() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "0002_AddFoo.json",
            r#"{"up": [{"op": "add_column", "table": "T",
                        "column": {"name": "Foo", "sql_type": "integer"}}]}"#,
        );
        write(
            dir.path(),
            "0001_CreateT.json",
            r#"{"up": [{"op": "create_table", "name": "T",
                        "columns": [{"name": "Id", "sql_type": "integer", "nullable": false}]}]}"#,
        );
        write(dir.path(), "README.md", "not a migration");

        let set = load_migrations(dir.path()).unwrap();
        let ids: Vec<String> = set.iter().map(|m| m.id().to_string()).collect();
        assert_eq!(ids, vec!["0001_CreateT", "0002_AddFoo"]);

        let foo = set.get("0002_AddFoo").unwrap();
        assert_eq!(
            foo.down(),
            &[MigrationOperation::drop_column("T", "Foo")]
        );
    }

    #[test]
    fn test_explicit_id_overrides_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "whatever.json",
            r#"{"id": "0007_RawFix",
                "up": [{"op": "execute_raw", "sql": "UPDATE T SET Foo = 0"}],
                "down": []}"#,
        );
        let migration = load_descriptor(&path).unwrap();
        assert_eq!(migration.id().as_str(), "0007_RawFix");
        assert!(migration.down().is_empty());
    }

    #[test]
    fn test_directory_errors_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(load_migrations(&missing), Err(MigrateError::Io(_))));

        fs::create_dir(dir.path().join("0001_NotAFile.json")).unwrap();
        write(dir.path(), "0002_AddFoo.json", r#"{"up": []}"#);
        let set = load_migrations(dir.path()).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "0001_Broken.json", r#"{"up": [{"op": "explode"}]}"#);
        match load_descriptor(&path) {
            Err(MigrateError::ParseError { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_underivable_down_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "0003_DropT.json",
            r#"{"up": [{"op": "drop_table", "name": "T"}]}"#,
        );
        assert!(matches!(
            load_descriptor(&path),
            Err(MigrateError::Validation(_))
        ));
    }

    #[test]
    fn test_load_seed_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "seed.json",
            r#"{"steps": [{"step": "upsert", "table": "Status", "natural_key": ["Name"],
                           "records": [{"Name": "Active"}]}]}"#,
        );
        let plan = load_seed_plan(&path).unwrap();
        assert_eq!(plan.steps.len(), 1);
    }
}
