use crate::core::DbError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Invalid migration '{id}': {reason}")]
    Definition { id: String, reason: String },

    #[error("Migration '{id}' is registered more than once")]
    DuplicateId { id: String },

    #[error("Migration '{id}' failed: {source}")]
    Apply {
        id: String,
        #[source]
        source: DbError,
    },

    #[error("Migration '{id}' cannot be rolled back: it has no backward operation")]
    NotReversible { id: String },

    #[error("Rollback of migration '{id}' failed, schema needs manual repair: {source}")]
    Rollback {
        id: String,
        #[source]
        source: DbError,
    },

    #[error("Migration '{id}' did not finish within {timeout:?} and was discarded")]
    TimedOut { id: String, timeout: Duration },

    #[error("Migration run aborted before '{id}'")]
    Aborted { id: String },

    #[error("Migration '{id}' is not registered")]
    UnknownMigration { id: String },

    #[error("Ledger records '{id}' which this binary does not know. Upgrade the binary.")]
    UnknownApplied { id: String },

    #[error("Ledger has a gap: '{missing}' is not applied but the later '{applied}' is")]
    LedgerGap { missing: String, applied: String },

    #[error("Migration lock {} exists - another migration may be in progress", path.display())]
    MigrationInProgress { path: PathBuf },

    #[error("Ledger error: {0}")]
    Ledger(#[from] DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// The migration the error is about, when there is one.
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            Self::Definition { id, .. }
            | Self::DuplicateId { id }
            | Self::Apply { id, .. }
            | Self::NotReversible { id }
            | Self::Rollback { id, .. }
            | Self::TimedOut { id, .. }
            | Self::Aborted { id }
            | Self::UnknownMigration { id }
            | Self::UnknownApplied { id } => Some(id),
            Self::LedgerGap { missing, .. } => Some(missing),
            Self::MigrationInProgress { .. } | Self::Ledger(_) | Self::Io(_) => None,
        }
    }

    /// Errors raised while assembling the registry, before anything runs.
    pub fn is_definition_error(&self) -> bool {
        matches!(self, Self::Definition { .. } | Self::DuplicateId { .. })
    }

    /// A backward operation failed part-way through a rollback; the schema
    /// may not match the ledger until an operator intervenes.
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_id() {
        let err = MigrationError::Apply {
            id: "20200418230432".to_string(),
            source: DbError::TableNotFound("tasks".to_string()),
        };
        assert!(err.to_string().contains("20200418230432"));
        assert!(err.to_string().contains("tasks"));
        assert_eq!(err.migration_id(), Some("20200418230432"));

        let err = MigrationError::LedgerGap {
            missing: "001".to_string(),
            applied: "002".to_string(),
        };
        assert_eq!(err.migration_id(), Some("001"));
    }

    #[test]
    fn test_error_classification() {
        assert!(MigrationError::DuplicateId { id: "1".into() }.is_definition_error());
        assert!(!MigrationError::NotReversible { id: "1".into() }.is_definition_error());
        assert!(MigrationError::Rollback {
            id: "1".into(),
            source: DbError::ExecutionError("boom".into()),
        }
        .requires_manual_intervention());
    }
}
