use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use schemaledger::{
    DurabilityMode, MigrationError, MigrationReport, Migrator, MigratorConfig, RollbackTarget,
    revisions,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schemaledger")]
#[command(about = "Versioned, reversible schema migrations")]
struct Cli {
    /// Directory holding the database snapshot and the migration lock
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = Durability::Sync)]
    durability: Durability,

    /// Per-migration timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply all pending migrations
    Migrate {
        #[command(subcommand)]
        action: Option<MigrateAction>,
    },
    /// Roll back to a migration id, or by a number of migrations
    Rollback {
        /// Migration id to roll back to (it stays applied), or a count
        target: String,
    },
    /// Write a new, empty revision file
    New {
        description: String,
        #[arg(long, default_value = "src/revisions")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Show applied and pending migrations
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Durability {
    Sync,
    Async,
    None,
}

impl From<Durability> for DurabilityMode {
    fn from(value: Durability) -> Self {
        match value {
            Durability::Sync => DurabilityMode::Sync,
            Durability::Async => DurabilityMode::Async,
            Durability::None => DurabilityMode::None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(id) = e
                .downcast_ref::<MigrationError>()
                .and_then(MigrationError::migration_id)
            {
                eprintln!("Failing migration: {}", id);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = MigratorConfig::new()
        .data_dir(&cli.data_dir)
        .durability(cli.durability.into());
    if let Some(secs) = cli.timeout {
        config = config.unit_timeout(Duration::from_secs(secs));
    }

    match cli.command {
        Command::New { description, out } => new_revision(&description, &out),
        Command::Migrate { action } => {
            let registry = revisions::registry_for(&config.import_table)?;
            let migrator = Migrator::open(&registry, config).with_context(|| {
                format!("Failed to open database in '{}'", cli.data_dir.display())
            })?;
            match action {
                Some(MigrateAction::Status { json }) => print_status(&migrator.status()?, json),
                None => {
                    abort_on_ctrl_c(&migrator);
                    let applied = migrator.apply_pending().await?;
                    println!("Applied {} migration(s)", applied);
                    Ok(())
                }
            }
        }
        Command::Rollback { target } => {
            let registry = revisions::registry_for(&config.import_table)?;
            let migrator = Migrator::open(&registry, config).with_context(|| {
                format!("Failed to open database in '{}'", cli.data_dir.display())
            })?;
            let target = RollbackTarget::parse(&target, &registry)?;
            abort_on_ctrl_c(&migrator);
            let rolled_back = migrator.rollback_to(target).await?;
            println!("Rolled back {} migration(s)", rolled_back);
            Ok(())
        }
    }
}

/// Stops the run before the next unit on Ctrl-C. The unit in flight is
/// allowed to finish or fail on its own.
fn abort_on_ctrl_c(migrator: &Migrator<'_>) {
    let abort = migrator.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current migration");
            abort.abort();
        }
    });
}

fn print_status(report: &MigrationReport, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(report).context("Failed to serialize status report")?;
        println!("{}", rendered);
        return Ok(());
    }

    for state in &report.migrations {
        let applied_at = state
            .applied_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{:<8} {:<16} {:<20} {}{}",
            if state.is_applied() { "applied" } else { "pending" },
            state.id,
            applied_at,
            state.description,
            if state.reversible { "" } else { " (irreversible)" }
        );
    }
    for entry in &report.unknown_applied {
        println!(
            "{:<8} {:<16} {:<20} not known to this binary",
            "unknown",
            entry.id,
            entry.applied_at.format("%Y-%m-%d %H:%M:%S").to_string()
        );
    }

    let pending = report.pending().count();
    if pending == 0 {
        println!("Schema is up to date");
    } else {
        println!("{} migration(s) pending", pending);
    }
    Ok(())
}

fn new_revision(description: &str, out: &Path) -> Result<()> {
    if description.trim().is_empty() {
        return Err(anyhow!("Description must not be empty"));
    }

    let id = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let path = out.join(format!("revision_{}.rs", id));
    if path.exists() {
        return Err(anyhow!("Revision file '{}' already exists", path.display()));
    }

    let content = format!(
        "use crate::migration::{{Migration, SchemaOp}};\n\npub const ID: &str = \"{}\";\n\npub fn migration() -> Migration {{\n    // forward must not be empty; add a backward op unless the change is irreversible\n    Migration::new(ID, \"{}\", Vec::<SchemaOp>::new())\n}}\n",
        id,
        description.replace('"', "\\\"")
    );

    fs::create_dir_all(out)
        .with_context(|| format!("Failed to create directory '{}'", out.display()))?;
    fs::write(&path, content)
        .with_context(|| format!("Failed to write revision to '{}'", path.display()))?;

    println!("Generated revision {}: {}", id, path.display());
    println!("Declare `pub mod revision_{};` and register it in revisions::registry_for", id);
    Ok(())
}
