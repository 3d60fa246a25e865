pub mod database;
pub mod persistence;
pub mod table;

pub use database::{Database, SchemaTx};
pub use persistence::{DurabilityMode, SnapshotManager, SNAPSHOT_FILE};
pub use table::{Table, TableSchema};
