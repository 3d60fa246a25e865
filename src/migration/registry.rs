use super::error::MigrationError;
use super::unit::Migration;

/// Ordered, append-only collection of migration units.
///
/// Built once by the process entry point and then shared by reference with
/// the runner. Units are kept sorted by id, so registration order is
/// irrelevant: `sorted()` is the only order anything else ever sees.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    units: Vec<Migration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unit, rejecting invalid ids, duplicate ids and empty operations.
    pub fn register(&mut self, unit: Migration) -> Result<(), MigrationError> {
        validate(&unit)?;
        match self.units.binary_search_by(|existing| existing.id().cmp(unit.id())) {
            Ok(_) => Err(MigrationError::DuplicateId {
                id: unit.id().to_string(),
            }),
            Err(pos) => {
                self.units.insert(pos, unit);
                Ok(())
            }
        }
    }

    /// Fluent builder method to register a unit.
    pub fn with(mut self, unit: Migration) -> Result<Self, MigrationError> {
        self.register(unit)?;
        Ok(self)
    }

    /// All units in ascending id order.
    pub fn sorted(&self) -> &[Migration] {
        &self.units
    }

    pub fn get(&self, id: &str) -> Option<&Migration> {
        self.position(id).map(|pos| &self.units[pos])
    }

    /// Index of `id` within [`Registry::sorted`].
    pub fn position(&self, id: &str) -> Option<usize> {
        self.units.binary_search_by(|unit| unit.id().cmp(id)).ok()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.units.iter().map(|unit| unit.id())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

fn validate(unit: &Migration) -> Result<(), MigrationError> {
    let invalid = |reason: &str| MigrationError::Definition {
        id: unit.id().to_string(),
        reason: reason.to_string(),
    };

    if unit.id().is_empty() {
        return Err(invalid("id must not be empty"));
    }
    if !unit
        .id()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(invalid("id may only contain ASCII letters, digits, '_', '-' and '.'"));
    }
    if unit.forward().is_empty() {
        return Err(invalid("forward operation is empty"));
    }
    if unit.backward().is_some_and(|op| op.is_empty()) {
        return Err(invalid(
            "backward operation is empty; omit it to mark the migration irreversible",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{Operation, SchemaOp};

    fn unit(id: &str) -> Migration {
        Migration::new(id, format!("unit {}", id), SchemaOp::drop_table(format!("t{}", id)))
    }

    #[test]
    fn test_sorted_ignores_registration_order() {
        let mut registry = Registry::new();
        for id in ["20200418230432", "20190324205606", "20200120201756"] {
            registry.register(unit(id)).unwrap();
        }
        let ids: Vec<&str> = registry.ids().collect();
        assert_eq!(ids, vec!["20190324205606", "20200120201756", "20200418230432"]);
        assert_eq!(registry.position("20200120201756"), Some(1));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let registry = Registry::new().with(unit("001")).unwrap();
        let err = registry.with(unit("001")).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateId { ref id } if id == "001"));
        assert!(err.is_definition_error());
    }

    #[test]
    fn test_invalid_definitions_are_rejected() {
        let mut registry = Registry::new();
        assert!(registry.register(unit("")).is_err());
        assert!(registry.register(unit("00 1")).is_err());
        assert!(registry
            .register(Migration::new("001", "empty", Operation::Schema(Vec::new())))
            .is_err());
        assert!(registry
            .register(unit("002").with_backward(Operation::Schema(Vec::new())))
            .is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup() {
        let registry = Registry::new().with(unit("001")).unwrap().with(unit("002")).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("002"));
        assert_eq!(registry.get("001").map(|u| u.description()), Some("unit 001"));
        assert!(registry.get("003").is_none());
    }
}
