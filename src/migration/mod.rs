//! # Schema migration engine
//!
//! A [`Registry`] holds every [`Migration`] known to the binary, sorted by id.
//! A [`Migrator`] compares it with the [`StatusLedger`](crate::ledger::StatusLedger)
//! stored in the database and either applies what is pending
//! ([`Migrator::apply_pending`]) or walks back applied units
//! ([`Migrator::rollback_to`]).
//!
//! ## Guarantees
//!
//! - Units run strictly in ascending id order when applying and in the exact
//!   reverse when rolling back, one at a time.
//! - A unit's schema change and its ledger update commit together. A crash,
//!   timeout or abort mid-unit leaves the unit fully absent, and it is tried
//!   again on the next run.
//! - The applied ids always form a prefix of the sorted registry. A ledger
//!   that contradicts this (unknown id, gap) is reported before anything runs.
//! - Rollback checks the whole plan for irreversible units before touching
//!   anything.
//!
//! ## Files
//!
//! - `.migration.lock`: advisory lock in the data directory while a run is
//!   in progress.

mod context;
mod error;
mod lock;
mod registry;
mod report;
mod rollback;
mod runner;
mod unit;

pub use context::{AbortHandle, MigrationContext};
pub use error::MigrationError;
pub use lock::{MIGRATION_LOCK_FILE, MigrationLock};
pub use registry::Registry;
pub use report::{MigrationReport, MigrationState};
pub use rollback::RollbackTarget;
pub use runner::Migrator;
pub use unit::{CustomOperation, FnOperation, Migration, Operation, SchemaOp};
