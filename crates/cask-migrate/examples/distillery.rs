//! Example: Distillery Migrations
//!
//! Walks a small production-tracking schema forward and back: statuses,
//! casks with a row-version token, a warehouse key that forces a table
//! rebuild, and seeded reference data.
//!
//! Run with: cargo run --example distillery -p cask-migrate

use cask_migrate::prelude::*;

// =============================================================================
// Migration Definitions
// =============================================================================

/// Lookup table for cask states.
struct CreateStatus;

impl Migration for CreateStatus {
    const ID: &'static str = "201904151230451_CreateStatus";

    fn up() -> Vec<MigrationOperation> {
        vec![CreateTableBuilder::new("Status")
            .column(ColumnSchema::new("Id", SqlType::Integer).identity())
            .column(ColumnSchema::new("Name", SqlType::Varchar(50)).not_null())
            .primary_key("PK_Status", &["Id"])
            .build()]
    }
}

/// Casks, each in one status.
struct CreateCask;

impl Migration for CreateCask {
    const ID: &'static str = "201904161015000_CreateCask";

    fn up() -> Vec<MigrationOperation> {
        vec![
            CreateTableBuilder::new("Cask")
                .column(ColumnSchema::new("Id", SqlType::Integer).identity())
                .column(ColumnSchema::new("Label", SqlType::Varchar(100)).not_null())
                .column(ColumnSchema::new("StatusId", SqlType::Integer).not_null())
                .column(ColumnSchema::new("FilledOn", SqlType::Date))
                .column(ColumnSchema::new("RowVersion", SqlType::RowVersion).not_null())
                .primary_key("PK_Cask", &["Id"])
                .foreign_key(
                    ForeignKeyBuilder::new("FK_Cask_Status_StatusId")
                        .columns(&["StatusId"])
                        .references("Status", &["Id"])
                        .on_delete(ForeignKeyAction::Cascade)
                        .build(),
                )
                .build(),
            MigrationOperation::create_index(
                "Cask",
                IndexBuilder::new("IX_Cask_StatusId")
                    .columns(&["StatusId"])
                    .build(),
            ),
        ]
    }
}

/// Warehouses; linking casks to them rebuilds `Cask`.
struct AddWarehouse;

impl Migration for AddWarehouse {
    const ID: &'static str = "201905101200000_AddWarehouse";

    fn up() -> Vec<MigrationOperation> {
        vec![
            CreateTableBuilder::new("Warehouse")
                .column(ColumnSchema::new("Code", SqlType::Char(4)).not_null())
                .column(
                    ColumnSchema::new("Name", SqlType::Text)
                        .not_null()
                        .default(DefaultValue::String("Main".to_string())),
                )
                .primary_key("PK_Warehouse", &["Code"])
                .build(),
            MigrationOperation::add_column(
                "Cask",
                ColumnSchema::new("WarehouseCode", SqlType::Char(4)),
            ),
            MigrationOperation::add_foreign_key(
                "Cask",
                ForeignKeyBuilder::new("FK_Cask_Warehouse_WarehouseCode")
                    .columns(&["WarehouseCode"])
                    .references("Warehouse", &["Code"])
                    .on_delete(ForeignKeyAction::SetNull)
                    .build(),
            ),
        ]
    }
}

/// Proof becomes required; existing casks get 0.
struct RequireProof;

impl Migration for RequireProof {
    const ID: &'static str = "201906011100000_RequireProof";

    fn up() -> Vec<MigrationOperation> {
        vec![
            MigrationOperation::add_column("Cask", ColumnSchema::new("Proof", SqlType::Double)),
            MigrationOperation::alter_column(
                "Cask",
                "Proof",
                ColumnChanges::new()
                    .set_nullable(false)
                    .set_default(DefaultValue::Float(0.0)),
            )
            .with_original(ColumnSchema::new("Proof", SqlType::Double)),
        ]
    }
}

fn seed_plan() -> SeedPlan {
    SeedPlan::new()
        .upsert(
            SeedBatch::new("Status", &["Name"])
                .record([("Name", "Planned")])
                .record([("Name", "Filled")])
                .record([("Name", "Bottled")]),
        )
        .upsert(
            SeedBatch::new("Warehouse", &["Code"])
                .record([("Code", "NRTH"), ("Name", "North Rickhouse")])
                .update_existing(),
        )
}

// =============================================================================
// Main: Walk the Migrations
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("{}", "=".repeat(70));
    println!(" CASK-MIGRATE: Distillery Example");
    println!("{}", "=".repeat(70));
    println!();

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await?;

    let set = MigrationSet::new(vec![
        CreateStatus::to_descriptor()?,
        CreateCask::to_descriptor()?,
        AddWarehouse::to_descriptor()?,
        RequireProof::to_descriptor()?,
    ])?;
    let runner =
        MigrationRunner::new(pool.clone(), SqliteDialect::new()).with_seed_plan(seed_plan());

    println!("[1] Pending migrations:");
    for migration in runner.pending(&set, Direction::Up, None).await? {
        println!("    - {}", migration.id());
    }
    println!();

    println!("[2] Generated SQL:");
    println!("{}", "-".repeat(70));
    for script in runner.script(&set, Direction::Up, None).await? {
        println!("{}", script);
    }
    println!("{}", "-".repeat(70));
    println!();

    println!("[3] Applying up to {}...", AddWarehouse::ID);
    let report = runner.migrate_up(&set, Some(AddWarehouse::ID)).await?;
    println!("    Applied {} migrations", report.applied.len());
    if let Some(seed) = report.seed {
        println!("    Seeded {} reference rows", seed.inserted);
    }
    println!();

    sqlx::query(
        "INSERT INTO \"Cask\" (\"Label\", \"StatusId\", \"WarehouseCode\") \
         VALUES ('A1', 2, 'NRTH')",
    )
    .execute(&pool)
    .await?;

    println!("[4] Applying the rest...");
    runner.migrate_up(&set, None).await?;
    let proof: f64 = sqlx::query_scalar("SELECT \"Proof\" FROM \"Cask\" WHERE \"Label\" = 'A1'")
        .fetch_one(&pool)
        .await?;
    println!("    Existing cask now has proof {}", proof);
    println!("    {} tables match the history", runner.verify(&set).await?);
    println!();

    println!("[5] Status:");
    let status = runner.status(&set).await?;
    for entry in &status.applied {
        println!(
            "    [X] {} ({})",
            entry.migration_id,
            entry.applied_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();

    println!("[6] Reverting the latest migration...");
    let report = runner.migrate_down(&set, None).await?;
    println!("    Reverted {:?}", report.reverted);
    println!(
        "    Current version: {}",
        runner.current_version().await?.as_deref().unwrap_or("none")
    );
    println!();

    println!("[7] Reverting everything...");
    runner.migrate_down(&set, Some(REVERT_ALL)).await?;
    println!(
        "    Current version: {}",
        runner.current_version().await?.as_deref().unwrap_or("none")
    );
    println!();

    println!("{}", "=".repeat(70));
    println!(" Example completed successfully!");
    println!("{}", "=".repeat(70));

    Ok(())
}
