//! Reversal of applied migrations.

use super::error::MigrationError;
use super::registry::Registry;
use super::runner::Migrator;
use super::unit::Migration;
use std::fmt;
use std::time::Instant;

/// How far back a rollback goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackTarget {
    /// Undo every applied migration after this id. The target itself stays.
    To(String),
    /// Undo the last `n` applied migrations.
    Count(usize),
}

impl RollbackTarget {
    /// Interprets a CLI argument. A registered id takes precedence over a
    /// count, so a purely numeric id is still addressable.
    pub fn parse(arg: &str, registry: &Registry) -> Result<Self, MigrationError> {
        if registry.contains(arg) {
            return Ok(Self::To(arg.to_string()));
        }
        match arg.parse::<usize>() {
            Ok(count) => Ok(Self::Count(count)),
            Err(_) => Err(MigrationError::UnknownMigration {
                id: arg.to_string(),
            }),
        }
    }
}

impl fmt::Display for RollbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::To(id) => write!(f, "to '{}'", id),
            Self::Count(n) => write!(f, "last {}", n),
        }
    }
}

impl<'r> Migrator<'r> {
    /// Runs backward operations for the applied migrations selected by
    /// `target`, newest first, removing each ledger entry as it goes.
    ///
    /// Every selected migration must be reversible; if one is not, nothing
    /// runs and the ledger is untouched. A backward operation that fails
    /// stops the rollback with [`MigrationError::Rollback`].
    pub async fn rollback_to(&self, target: RollbackTarget) -> Result<usize, MigrationError> {
        let _lock = self.lock()?;
        let applied = self.check_ledger()?;
        let plan = self.rollback_plan(&target, applied.len())?;

        if plan.is_empty() {
            tracing::info!("Nothing to roll back ({})", target);
            return Ok(0);
        }

        if let Some(unit) = plan.iter().find(|unit| !unit.is_reversible()) {
            tracing::error!(
                "Cannot roll back {}: migration '{}' has no backward operation",
                target,
                unit.id()
            );
            return Err(MigrationError::NotReversible {
                id: unit.id().to_string(),
            });
        }

        tracing::info!("Rolling back {} migration(s) ({})", plan.len(), target);
        let started = Instant::now();

        for unit in &plan {
            if self.abort.is_aborted() {
                tracing::warn!("Rollback aborted before '{}'", unit.id());
                return Err(MigrationError::Aborted {
                    id: unit.id().to_string(),
                });
            }
            let Some(backward) = unit.backward() else {
                return Err(MigrationError::NotReversible {
                    id: unit.id().to_string(),
                });
            };

            let unit_started = Instant::now();
            let result = self
                .run_unit(unit, backward, |tx| self.ledger.remove(tx, unit.id()))
                .await;

            if let Err(failure) = result {
                let err = self.unit_error(unit, failure, |id, source| MigrationError::Rollback {
                    id,
                    source,
                });
                if err.requires_manual_intervention() {
                    tracing::error!(
                        "Rollback of '{}' failed, manual intervention required: {}",
                        unit.id(),
                        err
                    );
                } else {
                    tracing::error!("Rollback of '{}' stopped: {}", unit.id(), err);
                }
                return Err(err);
            }

            tracing::info!(
                "Rolled back migration '{}' ({}) in {:.2}s",
                unit.id(),
                unit.description(),
                unit_started.elapsed().as_secs_f64()
            );
        }

        tracing::info!(
            "Rolled back {} migration(s) in {:.2}s",
            plan.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(plan.len())
    }

    /// Applied units to undo, newest first.
    fn rollback_plan(
        &self,
        target: &RollbackTarget,
        applied: usize,
    ) -> Result<Vec<&'r Migration>, MigrationError> {
        let registry: &'r Registry = self.registry();
        let applied_units = &registry.sorted()[..applied];

        let keep = match target {
            RollbackTarget::To(id) => {
                let pos = registry
                    .position(id)
                    .ok_or_else(|| MigrationError::UnknownMigration { id: id.clone() })?;
                (pos + 1).min(applied)
            }
            RollbackTarget::Count(n) => applied.saturating_sub(*n),
        };

        Ok(applied_units[keep..].iter().rev().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::SchemaOp;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        for id in ["001", "002", "42"] {
            registry
                .register(Migration::new(id, "drop", SchemaOp::drop_table(format!("t{}", id))))
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_parse_prefers_registered_id() {
        let registry = registry();
        assert_eq!(
            RollbackTarget::parse("42", &registry).unwrap(),
            RollbackTarget::To("42".to_string())
        );
        assert_eq!(RollbackTarget::parse("3", &registry).unwrap(), RollbackTarget::Count(3));
        assert!(matches!(
            RollbackTarget::parse("nope", &registry),
            Err(MigrationError::UnknownMigration { .. })
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(RollbackTarget::Count(2).to_string(), "last 2");
        assert_eq!(RollbackTarget::To("001".into()).to_string(), "to '001'");
    }
}
