use crate::core::Result;
use crate::ledger::{DEFAULT_IMPORT_TABLE, DEFAULT_LEDGER_TABLE};
use crate::storage::{Database, DurabilityMode};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Migrator configuration
///
/// Built with the fluent setters below; the CLI maps its flags onto it.
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Directory holding the snapshot and the migration lock. `None` keeps
    /// everything in memory.
    pub data_dir: Option<PathBuf>,

    /// How snapshot writes reach the disk
    pub durability: DurabilityMode,

    /// Upper bound for a single migration unit
    pub unit_timeout: Option<Duration>,

    /// Name of the schema-migration ledger table
    pub ledger_table: String,

    /// Name of the per-account import-status table
    pub import_table: String,

    /// Age after which a leftover lock file is treated as abandoned
    pub lock_stale_after: Duration,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            durability: DurabilityMode::Sync,
            unit_timeout: None,
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            import_table: DEFAULT_IMPORT_TABLE.to_string(),
            lock_stale_after: Duration::from_secs(3600),
        }
    }
}

impl MigratorConfig {
    /// In-memory configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist under `dir`
    pub fn data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set durability mode
    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Set per-unit timeout
    pub fn unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = Some(timeout);
        self
    }

    /// Set ledger table name
    pub fn ledger_table(mut self, name: &str) -> Self {
        self.ledger_table = name.to_string();
        self
    }

    /// Set import-status table name
    pub fn import_table(mut self, name: &str) -> Self {
        self.import_table = name.to_string();
        self
    }

    /// Set the stale-lock threshold
    pub fn lock_stale_after(mut self, age: Duration) -> Self {
        self.lock_stale_after = age;
        self
    }

    /// Opens the store this configuration points at.
    pub fn open_database(&self) -> Result<Database> {
        match &self.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Database::open(dir, self.durability)
            }
            None => Ok(Database::in_memory()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder() {
        let config = MigratorConfig::new()
            .durability(DurabilityMode::Async)
            .unit_timeout(Duration::from_secs(5))
            .ledger_table("schema_version");

        assert_eq!(config.durability, DurabilityMode::Async);
        assert_eq!(config.unit_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.ledger_table, "schema_version");
        assert_eq!(config.import_table, DEFAULT_IMPORT_TABLE);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_open_database_creates_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("nested").join("data");
        let db = MigratorConfig::new().data_dir(&dir).open_database().unwrap();
        assert!(db.is_persistent());
        assert!(dir.is_dir());

        assert!(!MigratorConfig::new().open_database().unwrap().is_persistent());
    }
}
