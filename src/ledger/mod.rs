//! Persisted bookkeeping tables: the schema-migration ledger and the
//! per-account import-status tracker.

pub mod import;
pub mod status;

pub use import::{DEFAULT_IMPORT_TABLE, ImportStatus, ImportStatusTracker, MigratorNames};
pub use status::{DEFAULT_LEDGER_TABLE, LedgerEntry, StatusLedger};

mod timestamp {
    use crate::core::{DbError, Result, Value};
    use chrono::{DateTime, Utc};

    /// Reads a unix-seconds INTEGER column back into a UTC timestamp.
    pub(super) fn decode(value: &Value) -> Result<DateTime<Utc>> {
        let secs = value
            .as_i64()
            .ok_or_else(|| DbError::TypeMismatch(format!("Expected unix seconds, got {}", value)))?;
        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| DbError::TypeMismatch(format!("Timestamp {} is out of range", secs)))
    }
}
