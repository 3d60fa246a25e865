//! Everything needed to author and run migrations.
//!
//! ```
//! use schemaledger::prelude::*;
//!
//! let unit = Migration::new(
//!     "20200418230432",
//!     "Add bucket id property to task",
//!     SchemaOp::add_column("tasks", Column::new("bucket_id", DataType::Integer)),
//! )
//! .with_backward(SchemaOp::drop_column("tasks", "bucket_id"));
//! assert!(unit.is_reversible());
//! ```

pub use crate::config::MigratorConfig;
pub use crate::core::{Column, DataType, DbError, IndexDef, Value};
pub use crate::migration::{
    AbortHandle, CustomOperation, Migration, MigrationContext, MigrationError, Migrator,
    Operation, Registry, RollbackTarget, SchemaOp,
};
pub use crate::storage::{Database, DurabilityMode, SchemaTx, TableSchema};
