//! Adds the per-account import-status table.

use crate::ledger::import;
use crate::migration::{Migration, SchemaOp};

pub const ID: &str = "20200120201756";

pub fn migration(import_table: &str) -> Migration {
    Migration::new(
        ID,
        "Add migration status table",
        SchemaOp::create_table(import::table_schema(import_table)),
    )
    .with_backward(SchemaOp::drop_table(import_table))
}
