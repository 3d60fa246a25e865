//! Per-account record of which external data importers have already run.
//!
//! Unlike the schema ledger this table is written while the application is
//! serving, so every write goes through [`Database::write`] and relies on the
//! `(account_id, migrator_name)` unique index to reject repeats.

use super::timestamp;
use crate::core::{Column, DataType, DbError, IndexDef, Result, Row, Value};
use crate::storage::{Database, Table, TableSchema};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_IMPORT_TABLE: &str = "migration_status";

const UNIQUE_INDEX: &str = "uq_account_migrator";

/// Definition of the import-status table named `table`.
pub fn table_schema(table: &str) -> TableSchema {
    TableSchema::new(
        table,
        vec![
            Column::new("id", DataType::Integer).primary_key().auto_increment(),
            Column::new("account_id", DataType::Integer).not_null(),
            Column::new("migrator_name", DataType::Text).not_null(),
            Column::new("created", DataType::Integer).not_null(),
        ],
    )
    .with_index(IndexDef::new(UNIQUE_INDEX, ["account_id", "migrator_name"]).unique())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStatus {
    pub id: i64,
    pub account_id: i64,
    pub migrator_name: String,
    pub created_at: DateTime<Utc>,
}

/// Migrator names recorded for one account, in the order they ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigratorNames(Vec<String>);

impl MigratorNames {
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }
}

impl IntoIterator for MigratorNames {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a MigratorNames {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Clone)]
pub struct ImportStatusTracker {
    db: Database,
    table: String,
}

impl ImportStatusTracker {
    pub fn new(db: Database) -> Self {
        Self::with_table(db, DEFAULT_IMPORT_TABLE)
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

    pub fn has(&self, account_id: i64, migrator_name: &str) -> Result<bool> {
        Ok(self.get(account_id, migrator_name)?.is_some())
    }

    pub fn get(&self, account_id: i64, migrator_name: &str) -> Result<Option<ImportStatus>> {
        let table = self.db.table(&self.table)?;
        let key = [Value::Integer(account_id), Value::from(migrator_name)];
        table
            .find_unique(UNIQUE_INDEX, &key)?
            .map(|row| decode(&table, row))
            .transpose()
    }

    /// Records that `migrator_name` ran for `account_id`.
    ///
    /// A second call for the same pair fails with [`DbError::AlreadyRecorded`]
    /// and leaves the existing record untouched.
    pub fn record(&self, account_id: i64, migrator_name: &str) -> Result<ImportStatus> {
        if migrator_name.is_empty() {
            return Err(DbError::ConstraintViolation(
                "Migrator name must not be empty".to_string(),
            ));
        }

        let created_at = Utc::now();
        let result = self.db.write(|tx| {
            tx.insert(
                &self.table,
                [
                    ("account_id", Value::Integer(account_id)),
                    ("migrator_name", Value::from(migrator_name)),
                    ("created", Value::Integer(created_at.timestamp())),
                ],
            )
        });

        let row = match result {
            Ok(row) => row,
            Err(e) if e.is_unique_violation() => {
                return Err(DbError::AlreadyRecorded {
                    table: self.table.clone(),
                    key: format!("{}/{}", account_id, migrator_name),
                });
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(account_id, migrator = migrator_name, "Recorded import");
        let table = self.db.table(&self.table)?;
        decode(&table, &row)
    }

    /// Like [`record`](Self::record) but treats a repeat as success.
    /// Returns `false` when the import had already been recorded.
    pub fn mark_done(&self, account_id: i64, migrator_name: &str) -> Result<bool> {
        match self.record(account_id, migrator_name) {
            Ok(_) => Ok(true),
            Err(DbError::AlreadyRecorded { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn for_account(&self, account_id: i64) -> Result<MigratorNames> {
        let table = self.db.table(&self.table)?;
        let mut statuses = table
            .scan_unique_prefix(UNIQUE_INDEX, &[Value::Integer(account_id)])?
            .into_iter()
            .map(|row| decode(&table, row))
            .collect::<Result<Vec<_>>>()?;
        statuses.sort_by_key(|status| status.id);
        Ok(MigratorNames(
            statuses.into_iter().map(|s| s.migrator_name).collect(),
        ))
    }

    /// Deletes every record of `account_id`. Called when the account is removed.
    pub fn remove_account(&self, account_id: i64) -> Result<usize> {
        let removed = self.db.write(|tx| {
            let col = tx
                .table(&self.table)?
                .schema()
                .find_column_index("account_id")
                .ok_or_else(|| {
                    DbError::ColumnNotFound("account_id".to_string(), self.table.clone())
                })?;
            tx.delete_where(&self.table, |row| row[col].as_i64() == Some(account_id))
        })?;
        if removed > 0 {
            tracing::debug!(account_id, removed, "Removed import records");
        }
        Ok(removed)
    }
}

fn decode(table: &Table, row: &Row) -> Result<ImportStatus> {
    let int = |name: &str| -> Result<i64> {
        table
            .value(row, name)?
            .as_i64()
            .ok_or_else(|| DbError::TypeMismatch(format!("Column '{}' must be INTEGER", name)))
    };
    let migrator_name = table
        .value(row, "migrator_name")?
        .as_str()
        .ok_or_else(|| DbError::TypeMismatch("Column 'migrator_name' must be TEXT".to_string()))?
        .to_string();

    Ok(ImportStatus {
        id: int("id")?,
        account_id: int("account_id")?,
        migrator_name,
        created_at: timestamp::decode(table.value(row, "created")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ImportStatusTracker {
        let db = Database::in_memory();
        db.write(|tx| tx.create_table(table_schema(DEFAULT_IMPORT_TABLE)))
            .unwrap();
        ImportStatusTracker::new(db)
    }

    #[test]
    fn test_record_twice_conflicts() {
        let tracker = tracker();
        let first = tracker.record(1, "trello").unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.migrator_name, "trello");

        let err = tracker.record(1, "trello").unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(tracker.for_account(1).unwrap().len(), 1);
    }

    #[test]
    fn test_same_migrator_for_other_account_is_independent() {
        let tracker = tracker();
        tracker.record(1, "trello").unwrap();
        tracker.record(2, "trello").unwrap();
        assert!(tracker.has(2, "trello").unwrap());
        assert!(!tracker.has(3, "trello").unwrap());
    }

    #[test]
    fn test_mark_done_reports_repeat() {
        let tracker = tracker();
        assert!(tracker.mark_done(7, "todoist").unwrap());
        assert!(!tracker.mark_done(7, "todoist").unwrap());
        assert!(tracker.get(7, "todoist").unwrap().is_some());
    }

    #[test]
    fn test_for_account_is_restartable() {
        let tracker = tracker();
        tracker.record(1, "trello").unwrap();
        tracker.record(1, "wunderlist").unwrap();
        tracker.record(2, "todoist").unwrap();

        let names = tracker.for_account(1).unwrap();
        let first: Vec<&String> = names.iter().collect();
        let second: Vec<&String> = (&names).into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["trello", "wunderlist"]);
        assert!(names.contains("wunderlist"));
        assert!(tracker.for_account(99).unwrap().is_empty());
    }

    #[test]
    fn test_remove_account_cascades() {
        let tracker = tracker();
        tracker.record(1, "trello").unwrap();
        tracker.record(1, "todoist").unwrap();
        tracker.record(2, "trello").unwrap();

        assert_eq!(tracker.remove_account(1).unwrap(), 2);
        assert!(tracker.for_account(1).unwrap().is_empty());
        assert_eq!(tracker.remove_account(1).unwrap(), 0);
        assert!(tracker.has(2, "trello").unwrap());

        // the pair can be recorded again after the cascade
        assert!(tracker.mark_done(1, "trello").unwrap());
    }

    #[test]
    fn test_empty_migrator_name_is_rejected() {
        let tracker = tracker();
        assert!(matches!(
            tracker.record(1, ""),
            Err(DbError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_null_migrator_name_cannot_dodge_unique_index() {
        let tracker = tracker();
        let err = tracker
            .db
            .write(|tx| {
                tx.insert(
                    DEFAULT_IMPORT_TABLE,
                    [("account_id", Value::Integer(1)), ("created", Value::Integer(0))],
                )
            })
            .unwrap_err();
        assert!(err.to_string().contains("cannot be NULL"));
        assert!(tracker.for_account(1).unwrap().is_empty());
    }

    #[test]
    fn test_missing_table_is_reported() {
        let tracker = ImportStatusTracker::new(Database::in_memory());
        assert!(matches!(tracker.has(1, "trello"), Err(DbError::TableNotFound(_))));
    }
}
