pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{Column, IndexDef, Row};
pub use value::{DataType, Value};
