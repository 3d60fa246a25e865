use crate::ledger::LedgerEntry;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One registered migration and whether the ledger has it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationState {
    pub id: String,
    pub description: String,
    pub applied_at: Option<DateTime<Utc>>,
    pub reversible: bool,
}

impl MigrationState {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Applied vs. pending view of the registry, as printed by `migrate status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub migrations: Vec<MigrationState>,
    /// Ledger entries this binary has no migration for.
    pub unknown_applied: Vec<LedgerEntry>,
}

impl MigrationReport {
    pub fn applied(&self) -> impl Iterator<Item = &MigrationState> + '_ {
        self.migrations.iter().filter(|m| m.is_applied())
    }

    pub fn pending(&self) -> impl Iterator<Item = &MigrationState> + '_ {
        self.migrations.iter().filter(|m| !m.is_applied())
    }

    pub fn is_up_to_date(&self) -> bool {
        self.unknown_applied.is_empty() && self.pending().next().is_none()
    }
}
