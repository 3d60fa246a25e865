//! Schema revisions shipped with the binary.
//!
//! Files: `revision_<id>.rs`, where the id is the UTC creation timestamp
//! `YYYYMMDDHHMMSS`.
//!
//! To add a new revision:
//! 1. Create `revision_<id>.rs` with `pub fn migration(..) -> Migration`
//! 2. Declare the module here
//! 3. Register it in [`registry_for`]

use crate::ledger::DEFAULT_IMPORT_TABLE;
use crate::migration::{MigrationError, Registry};

pub mod revision_20190324205606;
pub mod revision_20200120201756;
pub mod revision_20200418230432;

/// All built-in revisions, using the default import-status table name.
pub fn registry() -> Result<Registry, MigrationError> {
    registry_for(DEFAULT_IMPORT_TABLE)
}

/// All built-in revisions, creating the import-status table as `import_table`.
pub fn registry_for(import_table: &str) -> Result<Registry, MigrationError> {
    Registry::new()
        .with(revision_20190324205606::migration())?
        .with(revision_20200120201756::migration(import_table))?
        .with(revision_20200418230432::migration())
}
