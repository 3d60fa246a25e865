//! Forward application of pending migrations.

use super::context::{AbortHandle, MigrationContext};
use super::error::MigrationError;
use super::lock::MigrationLock;
use super::registry::Registry;
use super::report::{MigrationReport, MigrationState};
use super::unit::{Migration, Operation};
use crate::config::MigratorConfig;
use crate::core::DbError;
use crate::ledger::{ImportStatusTracker, StatusLedger};
use crate::storage::{Database, SchemaTx};
use chrono::Utc;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Why a unit did not commit.
pub(super) enum UnitFailure {
    Failed(DbError),
    TimedOut(Duration),
}

/// Drives a [`Registry`] against one database.
///
/// Units run one at a time. Each unit's operation and its ledger update are
/// staged in a single [`SchemaTx`] and committed together, so a unit is
/// either fully recorded or fully absent, whatever interrupts it.
pub struct Migrator<'r> {
    registry: &'r Registry,
    db: Database,
    pub(super) ledger: StatusLedger,
    config: MigratorConfig,
    pub(super) abort: AbortHandle,
}

impl<'r> Migrator<'r> {
    pub fn new(registry: &'r Registry, db: Database, config: MigratorConfig) -> Self {
        let ledger = StatusLedger::with_table(db.clone(), config.ledger_table.clone());
        Self {
            registry,
            db,
            ledger,
            config,
            abort: AbortHandle::new(),
        }
    }

    /// Opens the database described by `config` and wraps it.
    pub fn open(registry: &'r Registry, config: MigratorConfig) -> Result<Self, MigrationError> {
        let db = config.open_database()?;
        Ok(Self::new(registry, db, config))
    }

    /// Uses `handle` instead of a private one, so a caller that already owns
    /// a handle (a signal listener, a custom operation) can stop the run.
    pub fn with_abort_handle(mut self, handle: AbortHandle) -> Self {
        self.abort = handle;
        self
    }

    /// Handle that stops the migrator before its next unit.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &StatusLedger {
        &self.ledger
    }

    /// Tracker over the configured import-status table.
    pub fn import_tracker(&self) -> ImportStatusTracker {
        ImportStatusTracker::with_table(self.db.clone(), self.config.import_table.clone())
    }

    pub fn status(&self) -> Result<MigrationReport, MigrationError> {
        let mut applied: HashMap<String, _> = self
            .ledger
            .entries()?
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect();

        let migrations = self
            .registry
            .sorted()
            .iter()
            .map(|unit| MigrationState {
                id: unit.id().to_string(),
                description: unit.description().to_string(),
                applied_at: applied.remove(unit.id()).map(|entry| entry.applied_at),
                reversible: unit.is_reversible(),
            })
            .collect();

        let mut unknown_applied: Vec<_> = applied.into_values().collect();
        unknown_applied.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(MigrationReport {
            migrations,
            unknown_applied,
        })
    }

    /// Applies every registered unit the ledger does not yet contain, in
    /// ascending id order, stopping at the first failure.
    ///
    /// Returns the number of units applied. Running it again right after a
    /// success applies nothing.
    pub async fn apply_pending(&self) -> Result<usize, MigrationError> {
        let _lock = self.lock()?;
        self.ledger.ensure_table()?;

        let applied = self.check_ledger()?;
        let pending = &self.registry.sorted()[applied.len()..];
        if pending.is_empty() {
            tracing::info!("Schema is up to date ({} migration(s) applied)", applied.len());
            return Ok(0);
        }

        tracing::info!(
            "Applying {} pending migration(s), {} already applied",
            pending.len(),
            applied.len()
        );
        let started = Instant::now();

        for unit in pending {
            if self.abort.is_aborted() {
                tracing::warn!("Migration run aborted before '{}'", unit.id());
                return Err(MigrationError::Aborted {
                    id: unit.id().to_string(),
                });
            }

            let unit_started = Instant::now();
            let result = self
                .run_unit(unit, unit.forward(), |tx| {
                    self.ledger.record(tx, unit.id(), Utc::now())
                })
                .await;

            if let Err(failure) = result {
                let err = self.unit_error(unit, failure, |id, source| MigrationError::Apply {
                    id,
                    source,
                });
                tracing::error!("Migration '{}' failed: {}", unit.id(), err);
                return Err(err);
            }

            tracing::info!(
                "Applied migration '{}' ({}) in {:.2}s",
                unit.id(),
                unit.description(),
                unit_started.elapsed().as_secs_f64()
            );
        }

        tracing::info!(
            "Applied {} migration(s) in {:.2}s",
            pending.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(pending.len())
    }

    /// Takes the advisory lock when the database lives on disk, then catches
    /// the store up with whatever other processes committed before it.
    pub(super) fn lock(&self) -> Result<Option<MigrationLock>, MigrationError> {
        let lock = match &self.config.data_dir {
            Some(dir) => Some(MigrationLock::acquire(dir, self.config.lock_stale_after)?),
            None => None,
        };
        if self.db.reload()? {
            tracing::info!("Store changed on disk since it was opened; reloaded");
        }
        Ok(lock)
    }

    /// Reads the applied ids and verifies they are a prefix of the registry.
    pub(super) fn check_ledger(&self) -> Result<Vec<String>, MigrationError> {
        let applied = self.ledger.applied_ids()?;
        let sorted = self.registry.sorted();

        for (pos, id) in applied.iter().enumerate() {
            if !self.registry.contains(id) {
                return Err(MigrationError::UnknownApplied { id: id.clone() });
            }
            let expected = sorted[pos].id();
            if expected != id {
                return Err(MigrationError::LedgerGap {
                    missing: expected.to_string(),
                    applied: id.clone(),
                });
            }
        }
        Ok(applied)
    }

    /// Runs `op` for `unit` in a fresh transaction, lets `finish` stage the
    /// ledger change, and commits. Nothing is published unless all of it
    /// succeeds within the configured timeout.
    pub(super) async fn run_unit<F>(
        &self,
        unit: &Migration,
        op: &Operation,
        finish: F,
    ) -> Result<(), UnitFailure>
    where
        F: FnOnce(&mut SchemaTx) -> crate::core::Result<()>,
    {
        let work = async {
            let mut tx = self.db.begin()?;
            {
                let mut ctx = MigrationContext::new(unit.id(), &mut tx, &self.abort);
                op.execute(&mut ctx).await?;
            }
            finish(&mut tx)?;
            Ok::<_, DbError>(tx)
        };

        let staged = match self.config.unit_timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| UnitFailure::TimedOut(limit))?,
            None => work.await,
        };

        let tx = staged.map_err(UnitFailure::Failed)?;
        self.db.commit(tx).map_err(UnitFailure::Failed)
    }

    pub(super) fn unit_error<F>(&self, unit: &Migration, failure: UnitFailure, failed: F) -> MigrationError
    where
        F: FnOnce(String, DbError) -> MigrationError,
    {
        let id = unit.id().to_string();
        match failure {
            UnitFailure::TimedOut(timeout) => MigrationError::TimedOut { id, timeout },
            UnitFailure::Failed(_) if self.abort.is_aborted() => MigrationError::Aborted { id },
            UnitFailure::Failed(source) => failed(id, source),
        }
    }
}

impl std::fmt::Debug for Migrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("migrations", &self.registry.len())
            .field("db", &self.db)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};
    use crate::migration::SchemaOp;
    use crate::storage::TableSchema;

    fn create(name: &str) -> SchemaOp {
        SchemaOp::create_table(TableSchema::new(
            name,
            vec![Column::new("id", DataType::Integer).primary_key()],
        ))
    }

    fn registry() -> Registry {
        Registry::new()
            .with(Migration::new("001", "create a", create("a")).with_backward(SchemaOp::drop_table("a")))
            .unwrap()
            .with(Migration::new("002", "create b", create("b")).with_backward(SchemaOp::drop_table("b")))
            .unwrap()
    }

    #[tokio::test]
    async fn test_apply_pending_is_idempotent() {
        let registry = registry();
        let migrator = Migrator::new(&registry, Database::in_memory(), MigratorConfig::new());

        assert_eq!(migrator.apply_pending().await.unwrap(), 2);
        assert_eq!(migrator.apply_pending().await.unwrap(), 0);
        assert_eq!(migrator.ledger().applied_ids().unwrap(), vec!["001", "002"]);
        assert!(migrator.database().table_exists("b").unwrap());
    }

    #[tokio::test]
    async fn test_status_before_and_after() {
        let registry = registry();
        let migrator = Migrator::new(&registry, Database::in_memory(), MigratorConfig::new());

        let report = migrator.status().unwrap();
        assert_eq!(report.pending().count(), 2);
        assert!(!report.is_up_to_date());

        migrator.apply_pending().await.unwrap();
        let report = migrator.status().unwrap();
        assert_eq!(report.applied().count(), 2);
        assert!(report.is_up_to_date());
        assert!(report.migrations.iter().all(|m| m.reversible));
    }

    #[tokio::test]
    async fn test_aborted_before_first_unit() {
        let registry = registry();
        let migrator = Migrator::new(&registry, Database::in_memory(), MigratorConfig::new());
        migrator.abort_handle().abort();

        let err = migrator.apply_pending().await.unwrap_err();
        assert!(matches!(err, MigrationError::Aborted { ref id } if id == "001"));
        assert!(migrator.ledger().applied_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_applied_id_is_rejected() {
        let registry = registry();
        let db = Database::in_memory();
        let migrator = Migrator::new(&registry, db.clone(), MigratorConfig::new());
        migrator.ledger().ensure_table().unwrap();
        db.write(|tx| migrator.ledger().record(tx, "999", Utc::now()))
            .unwrap();

        let err = migrator.apply_pending().await.unwrap_err();
        assert!(matches!(err, MigrationError::UnknownApplied { ref id } if id == "999"));
        assert_eq!(migrator.status().unwrap().unknown_applied.len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_gap_is_rejected() {
        let registry = registry();
        let db = Database::in_memory();
        let migrator = Migrator::new(&registry, db.clone(), MigratorConfig::new());
        migrator.ledger().ensure_table().unwrap();
        db.write(|tx| migrator.ledger().record(tx, "002", Utc::now()))
            .unwrap();

        let err = migrator.apply_pending().await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::LedgerGap { ref missing, ref applied } if missing == "001" && applied == "002"
        ));
    }
}
