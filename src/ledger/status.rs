//! Schema-migration ledger: one row per applied migration id.

use super::timestamp;
use crate::core::{Column, DataType, DbError, Result, Value};
use crate::storage::{Database, SchemaTx, Table, TableSchema};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_LEDGER_TABLE: &str = "migration";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub applied_at: DateTime<Utc>,
}

/// Persisted record of which migrations have been applied.
///
/// Writes take a [`SchemaTx`] so that recording or removing an id commits
/// together with the schema change it describes.
#[derive(Debug, Clone)]
pub struct StatusLedger {
    db: Database,
    table: String,
}

impl StatusLedger {
    pub fn new(db: Database) -> Self {
        Self::with_table(db, DEFAULT_LEDGER_TABLE)
    }

    pub fn with_table(db: Database, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> TableSchema {
        TableSchema::new(
            self.table.clone(),
            vec![
                Column::new("id", DataType::Text).primary_key(),
                Column::new("applied_at", DataType::Integer).not_null(),
            ],
        )
    }

    /// Creates the ledger table on first use.
    pub fn ensure_table(&self) -> Result<()> {
        let schema = self.schema();
        let created = self.db.write(|tx| tx.create_table_if_not_exists(schema))?;
        if created {
            tracing::info!("Created migration ledger table '{}'", self.table);
        }
        Ok(())
    }

    /// All entries in ascending id order. Empty if the table does not exist yet.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let table = match self.db.table(&self.table) {
            Ok(table) => table,
            Err(DbError::TableNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::with_capacity(table.row_count());
        for row in table.scan() {
            entries.push(decode(&table, row)?);
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    pub fn applied_ids(&self) -> Result<Vec<String>> {
        Ok(self.entries()?.into_iter().map(|entry| entry.id).collect())
    }

    pub fn has(&self, id: &str) -> Result<bool> {
        match self.db.table(&self.table) {
            Ok(table) => {
                let pkey = table.schema().primary_key_index_name();
                Ok(table.find_unique(&pkey, &[Value::from(id)])?.is_some())
            }
            Err(DbError::TableNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Stages a ledger entry for `id`. Fails with [`DbError::AlreadyRecorded`]
    /// if the id is already present.
    pub fn record(&self, tx: &mut SchemaTx, id: &str, applied_at: DateTime<Utc>) -> Result<()> {
        let result = tx.insert(
            &self.table,
            [
                ("id", Value::from(id)),
                ("applied_at", Value::Integer(applied_at.timestamp())),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_unique_violation() => Err(DbError::AlreadyRecorded {
                table: self.table.clone(),
                key: id.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Stages removal of the entry for `id`. Fails with
    /// [`DbError::NotRecorded`] if there is none.
    pub fn remove(&self, tx: &mut SchemaTx, id: &str) -> Result<()> {
        let id_col = column_index(tx.table(&self.table)?, "id")?;
        let removed = tx.delete_where(&self.table, |row| row[id_col].as_str() == Some(id))?;
        if removed == 0 {
            return Err(DbError::NotRecorded {
                table: self.table.clone(),
                key: id.to_string(),
            });
        }
        Ok(())
    }
}

fn column_index(table: &Table, name: &str) -> Result<usize> {
    table
        .schema()
        .find_column_index(name)
        .ok_or_else(|| DbError::ColumnNotFound(name.to_string(), table.name().to_string()))
}

fn decode(table: &Table, row: &crate::core::Row) -> Result<LedgerEntry> {
    let id = table
        .value(row, "id")?
        .as_str()
        .ok_or_else(|| DbError::TypeMismatch("ledger id must be TEXT".to_string()))?
        .to_string();
    let applied_at = timestamp::decode(table.value(row, "applied_at")?)?;
    Ok(LedgerEntry { id, applied_at })
}
