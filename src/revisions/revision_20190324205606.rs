//! Baseline: the `tasks` table.

use crate::core::{Column, DataType};
use crate::migration::{Migration, SchemaOp};
use crate::storage::TableSchema;

pub const ID: &str = "20190324205606";

pub fn tasks_schema() -> TableSchema {
    TableSchema::new(
        "tasks",
        vec![
            Column::new("id", DataType::Integer).primary_key().auto_increment(),
            Column::new("title", DataType::Text).not_null(),
            Column::new("description", DataType::Text),
            Column::new("done", DataType::Boolean).not_null().default_value(false),
            Column::new("done_at", DataType::Integer),
            Column::new("due_date", DataType::Integer),
            Column::new("priority", DataType::Integer).not_null().default_value(0i64),
            Column::new("list_id", DataType::Integer).not_null(),
            Column::new("created", DataType::Integer).not_null(),
            Column::new("updated", DataType::Integer).not_null(),
        ],
    )
}

pub fn migration() -> Migration {
    Migration::new(ID, "Create tasks table", SchemaOp::create_table(tasks_schema()))
        .with_backward(SchemaOp::drop_table("tasks"))
}
