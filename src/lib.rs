// ============================================================================
// schemaledger Library
// ============================================================================

pub mod config;
pub mod core;
pub mod ledger;
pub mod migration;
pub mod prelude;
pub mod revisions;
pub mod storage;

// Re-export main types for convenience
pub use config::MigratorConfig;
pub use crate::core::{DataType, DbError, Result, Value};
pub use storage::{Database, DurabilityMode, SchemaTx};

// Re-export engine API
pub use ledger::{ImportStatus, ImportStatusTracker, LedgerEntry, StatusLedger};
pub use migration::{
    AbortHandle, Migration, MigrationError, MigrationReport, Migrator, Operation, Registry,
    RollbackTarget, SchemaOp,
};

// ============================================================================
// Startup entry point
// ============================================================================

/// Applies every pending built-in revision and returns the open database.
///
/// Meant to be awaited by the process entry point before anything else
/// touches the schema.
///
/// # Examples
///
/// ```
/// use schemaledger::MigratorConfig;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db = schemaledger::migrate(&MigratorConfig::new()).await?;
/// assert!(db.table_exists("tasks")?);
/// # Ok(())
/// # }
/// ```
pub async fn migrate(config: &MigratorConfig) -> std::result::Result<Database, MigrationError> {
    let registry = revisions::registry_for(&config.import_table)?;
    let migrator = Migrator::open(&registry, config.clone())?;
    migrator.apply_pending().await?;
    Ok(migrator.database().clone())
}
