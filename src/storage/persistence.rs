//! Snapshot persistence for the embedded store.
//!
//! The whole table map is written as one MessagePack document through a
//! temporary file in the same directory and then renamed over the previous
//! snapshot, so a reader sees either the old state or the new one. Each
//! snapshot carries a generation number that grows by one per write, which
//! lets a handle notice that another process wrote after it loaded.

use crate::core::{DbError, Result};
use crate::storage::table::Table;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// File name of the snapshot inside the data directory.
pub const SNAPSHOT_FILE: &str = "schemaledger.snapshot";

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync the snapshot before renaming it into place.
    #[default]
    Sync,
    /// Write and rename without fsync.
    Async,
    /// Keep everything in memory.
    None,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: u32,
    pub tables: HashMap<String, Table>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub generation: u64,
    pub created_at: i64,
    pub row_count: usize,
    pub table_count: usize,
}

/// Leading part of a snapshot, decoded without materializing the tables.
#[derive(Deserialize)]
struct SnapshotHeader {
    version: u32,
    #[allow(dead_code)]
    tables: IgnoredAny,
    metadata: SnapshotMetadata,
}

impl DatabaseSnapshot {
    pub fn new(tables: HashMap<String, Table>, generation: u64) -> Self {
        let row_count = tables.values().map(|t| t.row_count()).sum();
        let table_count = tables.len();

        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            tables,
            metadata: SnapshotMetadata {
                generation,
                created_at: chrono::Utc::now().timestamp_millis(),
                row_count,
                table_count,
            },
        }
    }
}

pub struct SnapshotManager {
    snapshot_path: PathBuf,
    durability_mode: DurabilityMode,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> Self {
        Self {
            snapshot_path: data_dir.as_ref().join(SNAPSHOT_FILE),
            durability_mode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }

    pub fn save(&self, snapshot: &DatabaseSnapshot) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let parent = self
            .snapshot_path
            .parent()
            .ok_or_else(|| DbError::IoError("Snapshot path has no parent directory".to_string()))?;
        fs::create_dir_all(parent)?;

        let serialized = rmp_serde::to_vec(snapshot)
            .map_err(|e| DbError::Encoding(format!("Failed to serialize snapshot: {}", e)))?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(&serialized)?;
        temp.flush()?;
        if self.durability_mode == DurabilityMode::Sync {
            temp.as_file().sync_all()?;
        }
        temp.persist(&self.snapshot_path)
            .map_err(|e| DbError::IoError(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<DatabaseSnapshot>> {
        let Some(data) = self.read()? else {
            return Ok(None);
        };
        let snapshot: DatabaseSnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| DbError::Encoding(format!("Failed to deserialize snapshot: {}", e)))?;
        check_version(snapshot.version)?;
        Ok(Some(snapshot))
    }

    /// Generation of the snapshot on disk, 0 when there is none yet.
    pub fn generation(&self) -> Result<u64> {
        let Some(data) = self.read()? else {
            return Ok(0);
        };
        let header: SnapshotHeader = rmp_serde::from_slice(&data)
            .map_err(|e| DbError::Encoding(format!("Failed to read snapshot header: {}", e)))?;
        check_version(header.version)?;
        Ok(header.metadata.generation)
    }

    fn read(&self) -> Result<Option<Vec<u8>>> {
        let mut file = match File::open(&self.snapshot_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

fn check_version(version: u32) -> Result<()> {
    if version != SNAPSHOT_FORMAT_VERSION {
        return Err(DbError::Encoding(format!(
            "Unsupported snapshot format version {}",
            version
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, Value};
    use crate::storage::table::TableSchema;
    use tempfile::TempDir;

    fn users() -> Table {
        let mut table = Table::new(TableSchema::new(
            "users",
            vec![
                Column::new("id", DataType::Integer).primary_key(),
                Column::new("name", DataType::Text),
            ],
        ))
        .unwrap();
        table
            .insert(vec![
                ("id".to_string(), Value::Integer(1)),
                ("name".to_string(), Value::from("Alice")),
            ])
            .unwrap();
        table
    }

    #[test]
    fn test_snapshot_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path(), DurabilityMode::Sync);
        assert!(!manager.exists());
        assert!(manager.load().unwrap().is_none());

        let mut tables = HashMap::new();
        tables.insert("users".to_string(), users());
        manager.save(&DatabaseSnapshot::new(tables, 1)).unwrap();

        assert!(manager.exists());
        assert_eq!(manager.generation().unwrap(), 1);
        let loaded = manager.load().unwrap().unwrap();
        assert_eq!(loaded.metadata.table_count, 1);
        assert_eq!(loaded.metadata.row_count, 1);
        assert_eq!(loaded.tables["users"].row_count(), 1);
    }

    #[test]
    fn test_memory_mode_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path(), DurabilityMode::None);
        manager.save(&DatabaseSnapshot::new(HashMap::new(), 1)).unwrap();
        assert!(!manager.exists());
        assert_eq!(manager.generation().unwrap(), 0);
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path(), DurabilityMode::Async);

        let mut tables = HashMap::new();
        tables.insert("users".to_string(), users());
        manager.save(&DatabaseSnapshot::new(tables, 1)).unwrap();
        manager.save(&DatabaseSnapshot::new(HashMap::new(), 2)).unwrap();

        let loaded = manager.load().unwrap().unwrap();
        assert_eq!(loaded.metadata.table_count, 0);
        assert_eq!(loaded.metadata.generation, 2);
        // no temp files left behind
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }
}
