use super::context::MigrationContext;
use crate::core::{Column, IndexDef, Result};
use crate::storage::{SchemaTx, TableSchema};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Declarative schema change.
///
/// Every variant is safe to run again after a crash: creating something that
/// already exists with the same definition, or dropping something that is
/// already gone, does nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOp {
    CreateTable(TableSchema),
    DropTable(String),
    RenameTable { from: String, to: String },
    AddColumn { table: String, column: Column },
    DropColumn { table: String, column: String },
    CreateIndex { table: String, index: IndexDef },
    DropIndex { table: String, index: String },
}

impl SchemaOp {
    pub fn create_table(schema: TableSchema) -> Self {
        Self::CreateTable(schema)
    }

    pub fn drop_table(name: impl Into<String>) -> Self {
        Self::DropTable(name.into())
    }

    pub fn rename_table(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::RenameTable {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn add_column(table: impl Into<String>, column: Column) -> Self {
        Self::AddColumn {
            table: table.into(),
            column,
        }
    }

    pub fn drop_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::DropColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn create_index(table: impl Into<String>, index: IndexDef) -> Self {
        Self::CreateIndex {
            table: table.into(),
            index,
        }
    }

    pub fn drop_index(table: impl Into<String>, index: impl Into<String>) -> Self {
        Self::DropIndex {
            table: table.into(),
            index: index.into(),
        }
    }

    /// Applies the change to the staged schema. Returns whether anything changed.
    pub fn apply(&self, tx: &mut SchemaTx) -> Result<bool> {
        match self {
            Self::CreateTable(schema) => tx.create_table_if_not_exists(schema.clone()),
            Self::DropTable(name) => tx.drop_table_if_exists(name),
            Self::RenameTable { from, to } => {
                if !tx.table_exists(from) && tx.table_exists(to) {
                    return Ok(false);
                }
                tx.rename_table(from, to)?;
                Ok(true)
            }
            Self::AddColumn { table, column } => tx.add_column(table, column.clone()),
            Self::DropColumn { table, column } => tx.drop_column(table, column),
            Self::CreateIndex { table, index } => tx.create_index(table, index.clone()),
            Self::DropIndex { table, index } => tx.drop_index(table, index),
        }
    }
}

impl fmt::Display for SchemaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable(schema) => write!(f, "CREATE TABLE {}", schema.name()),
            Self::DropTable(name) => write!(f, "DROP TABLE {}", name),
            Self::RenameTable { from, to } => write!(f, "RENAME TABLE {} TO {}", from, to),
            Self::AddColumn { table, column } => write!(
                f,
                "ALTER TABLE {} ADD COLUMN {} {}",
                table, column.name, column.data_type
            ),
            Self::DropColumn { table, column } => {
                write!(f, "ALTER TABLE {} DROP COLUMN {}", table, column)
            }
            Self::CreateIndex { table, index } => write!(
                f,
                "CREATE {}INDEX {} ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                index.name,
                table,
                index.columns.join(", ")
            ),
            Self::DropIndex { table, index } => write!(f, "DROP INDEX {} ON {}", index, table),
        }
    }
}

/// Hand-written migration logic for changes the declarative ops cannot express.
///
/// Implementations must be safe to re-run if a previous attempt did not commit.
#[async_trait]
pub trait CustomOperation: Send + Sync {
    async fn run(&self, ctx: &mut MigrationContext<'_>) -> Result<()>;
}

/// Adapts a synchronous closure over the staged schema into a [`CustomOperation`].
pub struct FnOperation<F> {
    f: F,
}

#[async_trait]
impl<F> CustomOperation for FnOperation<F>
where
    F: Fn(&mut SchemaTx) -> Result<()> + Send + Sync,
{
    async fn run(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        (self.f)(ctx.tx())
    }
}

/// One direction of a migration unit.
#[derive(Clone)]
pub enum Operation {
    Schema(Vec<SchemaOp>),
    Custom(Arc<dyn CustomOperation>),
}

impl Operation {
    pub fn schema<I>(ops: I) -> Self
    where
        I: IntoIterator<Item = SchemaOp>,
    {
        Self::Schema(ops.into_iter().collect())
    }

    pub fn custom<C>(op: C) -> Self
    where
        C: CustomOperation + 'static,
    {
        Self::Custom(Arc::new(op))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&mut SchemaTx) -> Result<()> + Send + Sync + 'static,
    {
        Self::custom(FnOperation { f })
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Self::Schema(ops) if ops.is_empty())
    }

    pub(crate) async fn execute(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        match self {
            Self::Schema(ops) => {
                for op in ops {
                    ctx.check_abort()?;
                    let changed = op.apply(ctx.tx())?;
                    if !changed {
                        tracing::debug!(migration = ctx.id(), "Skipped '{}': already in place", op);
                    }
                }
                Ok(())
            }
            Self::Custom(op) => op.run(ctx).await,
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema(ops) => f.debug_tuple("Schema").field(ops).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<SchemaOp> for Operation {
    fn from(op: SchemaOp) -> Self {
        Self::Schema(vec![op])
    }
}

impl From<Vec<SchemaOp>> for Operation {
    fn from(ops: Vec<SchemaOp>) -> Self {
        Self::Schema(ops)
    }
}

/// A single, ordered, uniquely identified schema change.
///
/// `id` must sort lexicographically in the same order the migrations were
/// written, e.g. a zero-padded `YYYYMMDDHHMMSS` timestamp.
#[derive(Clone)]
pub struct Migration {
    id: String,
    description: String,
    forward: Operation,
    backward: Option<Operation>,
}

impl Migration {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        forward: impl Into<Operation>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            forward: forward.into(),
            backward: None,
        }
    }

    /// Sets the operation that undoes `forward`. Without one the unit is
    /// irreversible and rollback refuses to cross it.
    pub fn with_backward(mut self, backward: impl Into<Operation>) -> Self {
        self.backward = Some(backward.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn forward(&self) -> &Operation {
        &self.forward
    }

    pub fn backward(&self) -> Option<&Operation> {
        self.backward.as_ref()
    }

    pub fn is_reversible(&self) -> bool {
        self.backward.is_some()
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("forward", &self.forward)
            .field("has_backward", &self.backward.is_some())
            .finish()
    }
}
