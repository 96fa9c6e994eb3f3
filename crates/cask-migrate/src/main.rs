//! cask-migrate CLI
//!
//! Command-line tool for applying, reverting and inspecting migrations.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cask_migrate::config::{RunnerConfig, DEFAULT_HISTORY_TABLE};
use cask_migrate::loader::{load_migrations, load_seed_plan};
use cask_migrate::prelude::*;

/// Ordered, reversible schema migrations for SQLite.
#[derive(Parser)]
#[command(name = "migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Directory of JSON migration descriptors.
    #[arg(short, long, env = "MIGRATIONS_DIR", default_value = "migrations")]
    migrations_dir: PathBuf,

    /// Seed plan run after first-time setup and by `seed`.
    #[arg(short, long, env = "SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// Name of the history table.
    #[arg(long, default_value = DEFAULT_HISTORY_TABLE)]
    history_table: String,

    /// Seconds to wait for the migration lock.
    #[arg(long, default_value_t = 30)]
    lock_timeout_secs: u64,

    /// Time budget for a single migration, in seconds.
    #[arg(long)]
    apply_timeout_secs: Option<u64>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations.
    Up {
        /// Last migration to apply (all if not specified).
        #[arg(long)]
        to: Option<String>,

        /// Show SQL without executing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert applied migrations.
    Down {
        /// Migration to revert back to; it stays applied. `0` reverts
        /// everything. Only the latest migration is reverted if not specified.
        #[arg(long)]
        to: Option<String>,

        /// Show SQL without executing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show migration status.
    Status,

    /// Run the seed plan.
    Seed,

    /// Check the live schema against the applied migrations.
    Verify,

    /// Settle an interrupted migration.
    Resolve {
        /// Id of the interrupted migration.
        id: String,

        /// Its changes are in the database.
        #[arg(long, conflicts_with = "reverted", required_unless_present = "reverted")]
        applied: bool,

        /// Its changes are not in the database.
        #[arg(long)]
        reverted: bool,
    },

    /// Force-release the migration lock.
    Unlock,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<MigrateError>()
                .map_or(1, MigrateError::exit_code);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let options = cli
        .database
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let config = RunnerConfig::new()
        .history_table(&cli.history_table)
        .lock_timeout(Duration::from_secs(cli.lock_timeout_secs))
        .apply_timeout(cli.apply_timeout_secs.map(Duration::from_secs));
    let mut runner = MigrationRunner::new(pool, SqliteDialect::new()).with_config(config);
    if let Some(path) = &cli.seed_file {
        runner = runner.with_seed_plan(load_seed_plan(path)?);
    }

    let cancel = runner.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current migration");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    match cli.command {
        Commands::Up { to, dry_run } => {
            let set = load_migrations(&cli.migrations_dir)?;
            if dry_run {
                print_script(&runner, &set, Direction::Up, to.as_deref()).await?;
            } else {
                let report = runner.migrate_up(&set, to.as_deref()).await?;
                info!(applied = report.applied.len(), "Migrations applied");
                if let Some(seed) = report.seed {
                    info!(inserted = seed.inserted, "Reference data seeded");
                }
            }
        }

        Commands::Down { to, dry_run } => {
            let set = load_migrations(&cli.migrations_dir)?;
            if dry_run {
                print_script(&runner, &set, Direction::Down, to.as_deref()).await?;
            } else {
                let report = runner.migrate_down(&set, to.as_deref()).await?;
                info!(reverted = report.reverted.len(), "Migrations reverted");
            }
        }

        Commands::Status => {
            let set = load_migrations(&cli.migrations_dir)?;
            print_status(&runner.status(&set).await?);
        }

        Commands::Seed => {
            let path = cli
                .seed_file
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("No seed file given (use --seed-file or SEED_FILE)"))?;
            let report = runner.seed(&load_seed_plan(path)?).await?;
            println!(
                "Seeded: {} inserted, {} updated, {} unchanged, {} affected by raw steps",
                report.inserted, report.updated, report.unchanged, report.raw_rows_affected
            );
        }

        Commands::Verify => {
            let set = load_migrations(&cli.migrations_dir)?;
            let tables = runner.verify(&set).await?;
            println!("Schema matches migration history ({} tables checked)", tables);
        }

        Commands::Resolve {
            id,
            applied,
            reverted: _,
        } => {
            let set = load_migrations(&cli.migrations_dir)?;
            runner.resolve(&set, &id, applied).await?;
            println!(
                "Resolved {} as {}",
                id,
                if applied { "applied" } else { "reverted" }
            );
        }

        Commands::Unlock => match runner.unlock().await? {
            Some(owner) => println!("Released lock held by {}", owner),
            None => println!("Lock was not held"),
        },
    }

    Ok(())
}

async fn print_script(
    runner: &MigrationRunner<SqliteDialect>,
    set: &MigrationSet,
    direction: Direction,
    target: Option<&str>,
) -> anyhow::Result<()> {
    info!("Dry run mode - SQL will be printed but not executed.");
    let scripts = runner.script(set, direction, target).await?;
    if scripts.is_empty() {
        info!("Nothing to do.");
    }
    for script in &scripts {
        println!("{}", script);
    }
    Ok(())
}

fn print_status(status: &cask_migrate::runner::StatusReport) {
    println!(
        "\nCurrent version: {}",
        status.current_version.as_deref().unwrap_or("none")
    );
    println!("{:-<60}", "");
    for entry in &status.applied {
        let mut flags = String::new();
        if status.changed.contains(&entry.migration_id) {
            flags.push_str(" (modified)");
        }
        if status.unknown.contains(&entry.migration_id) {
            flags.push_str(" (unknown)");
        }
        println!(
            " [X] {} ({}){}",
            entry.migration_id,
            entry.applied_at.format("%Y-%m-%d %H:%M:%S"),
            flags
        );
    }
    for id in &status.pending {
        println!(" [ ] {}", id);
    }
    println!();

    if let Some(marker) = &status.inflight {
        println!(
            "Interrupted: {} ({}) started {}; run `migrate resolve`",
            marker.migration_id, marker.direction, marker.started_at
        );
    }
    if let Some(owner) = &status.lock_holder {
        println!("Lock held by {}", owner);
    }
}
