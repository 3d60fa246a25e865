//! Context handed to each migration operation.

use crate::core::{DbError, Result};
use crate::storage::SchemaTx;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop signal shared between the caller and a running migrator.
///
/// The runner checks it between units; long custom operations can poll it
/// through [`MigrationContext::check_abort`].
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

pub struct MigrationContext<'a> {
    id: &'a str,
    tx: &'a mut SchemaTx,
    abort: &'a AbortHandle,
}

impl<'a> MigrationContext<'a> {
    pub fn new(id: &'a str, tx: &'a mut SchemaTx, abort: &'a AbortHandle) -> Self {
        Self { id, tx, abort }
    }

    /// Id of the migration being run.
    pub fn id(&self) -> &str {
        self.id
    }

    pub fn tx(&mut self) -> &mut SchemaTx {
        &mut *self.tx
    }

    pub fn should_abort(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Fails the current operation if an abort was requested. The unit's
    /// staged changes are then discarded.
    pub fn check_abort(&self) -> Result<()> {
        if self.should_abort() {
            return Err(DbError::ExecutionError(format!(
                "Migration '{}' interrupted by abort request",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_abort_is_visible_through_context() {
        let db = Database::in_memory();
        let mut tx = db.begin().unwrap();
        let handle = AbortHandle::new();
        let ctx = MigrationContext::new("001", &mut tx, &handle);

        assert!(ctx.check_abort().is_ok());
        handle.clone().abort();
        assert!(ctx.should_abort());
        assert!(ctx.check_abort().unwrap_err().to_string().contains("001"));
    }
}
