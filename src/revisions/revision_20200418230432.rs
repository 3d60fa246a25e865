use crate::core::{Column, DataType};
use crate::migration::{Migration, SchemaOp};

pub const ID: &str = "20200418230432";

pub fn migration() -> Migration {
    Migration::new(
        ID,
        "Add bucket id property to task",
        SchemaOp::add_column("tasks", Column::new("bucket_id", DataType::Integer)),
    )
    .with_backward(SchemaOp::drop_column("tasks", "bucket_id"))
}
