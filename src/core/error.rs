use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' already exists in table '{1}'")]
    ColumnExists(String, String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Index '{0}' not found on table '{1}'")]
    IndexNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Unique constraint violation on '{index}' in table '{table}'")]
    UniqueViolation { table: String, index: String },

    #[error("'{key}' is already recorded in '{table}'")]
    AlreadyRecorded { table: String, key: String },

    #[error("'{key}' is not recorded in '{table}'")]
    NotRecorded { table: String, key: String },

    #[error("Table '{0}' was modified concurrently; transaction discarded")]
    ConcurrentModification(String),

    #[error("Snapshot on disk is at generation {on_disk} but this handle loaded {loaded}; reload before writing")]
    StaleSnapshot { loaded: u64, on_disk: u64 },

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Snapshot encoding error: {0}")]
    Encoding(String),
}

impl DbError {
    /// True when the error came from a unique index rejecting a row.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }

    /// True for the recoverable "already done" outcome of a ledger insert.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyRecorded { .. } | Self::UniqueViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
