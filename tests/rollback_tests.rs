//! Integration tests for rolling migrations back.

use schemaledger::prelude::*;

fn table(name: &str) -> TableSchema {
    TableSchema::new(
        name,
        vec![Column::new("id", DataType::Integer).primary_key().auto_increment()],
    )
}

fn reversible(id: &str, name: &str) -> Migration {
    Migration::new(id, format!("create {}", name), SchemaOp::create_table(table(name)))
        .with_backward(SchemaOp::drop_table(name))
}

fn irreversible(id: &str, name: &str) -> Migration {
    Migration::new(id, format!("create {}", name), SchemaOp::create_table(table(name)))
}

fn registry(units: Vec<Migration>) -> Registry {
    let mut registry = Registry::new();
    for unit in units {
        registry.register(unit).unwrap();
    }
    registry
}

#[tokio::test]
async fn test_rollback_one_then_reapply() {
    let registry = registry(vec![reversible("001", "lists"), reversible("002", "tasks")]);
    let migrator = Migrator::new(&registry, Database::in_memory(), MigratorConfig::new());

    assert_eq!(migrator.apply_pending().await.unwrap(), 2);
    assert_eq!(migrator.ledger().applied_ids().unwrap(), vec!["001", "002"]);

    assert_eq!(migrator.rollback_to(RollbackTarget::Count(1)).await.unwrap(), 1);
    assert_eq!(migrator.ledger().applied_ids().unwrap(), vec!["001"]);
    assert!(!migrator.database().table_exists("tasks").unwrap());
    assert!(migrator.database().table_exists("lists").unwrap());

    assert_eq!(migrator.apply_pending().await.unwrap(), 1);
    assert_eq!(migrator.ledger().applied_ids().unwrap(), vec!["001", "002"]);
    assert!(migrator.database().table_exists("tasks").unwrap());
}

#[tokio::test]
async fn test_rollback_to_id_keeps_target() {
    let registry = registry(vec![
        reversible("001", "lists"),
        reversible("002", "tasks"),
        reversible("003", "labels"),
    ]);
    let migrator = Migrator::new(&registry, Database::in_memory(), MigratorConfig::new());
    migrator.apply_pending().await.unwrap();

    let rolled_back = migrator
        .rollback_to(RollbackTarget::To("001".to_string()))
        .await
        .unwrap();
    assert_eq!(rolled_back, 2);
    assert_eq!(migrator.ledger().applied_ids().unwrap(), vec!["001"]);
    assert_eq!(migrator.database().list_tables().unwrap(), vec!["lists", "migration"]);

    // restores the ledger
    migrator.apply_pending().await.unwrap();
    assert_eq!(migrator.ledger().applied_ids().unwrap(), vec!["001", "002", "003"]);
}

#[tokio::test]
async fn test_rollback_runs_newest_first() {
    // dropping bucket_id fails while tasks_bucket still covers it
    let registry = registry(vec![
        reversible("001", "tasks"),
        Migration::new(
            "002",
            "add bucket",
            SchemaOp::add_column("tasks", Column::new("bucket_id", DataType::Integer)),
        )
        .with_backward(SchemaOp::drop_column("tasks", "bucket_id")),
        Migration::new(
            "003",
            "index bucket",
            SchemaOp::create_index("tasks", IndexDef::new("tasks_bucket", ["bucket_id"])),
        )
        .with_backward(SchemaOp::drop_index("tasks", "tasks_bucket")),
    ]);
    let migrator = Migrator::new(&registry, Database::in_memory(), MigratorConfig::new());
    migrator.apply_pending().await.unwrap();

    assert_eq!(migrator.rollback_to(RollbackTarget::Count(3)).await.unwrap(), 3);
    assert!(migrator.ledger().applied_ids().unwrap().is_empty());
    assert!(!migrator.database().table_exists("tasks").unwrap());
}

#[tokio::test]
async fn test_irreversible_unit_blocks_rollback_without_mutation() {
    let registry = registry(vec![
        reversible("001", "lists"),
        irreversible("002", "tasks"),
        reversible("003", "labels"),
    ]);
    let migrator = Migrator::new(&registry, Database::in_memory(), MigratorConfig::new());
    migrator.apply_pending().await.unwrap();

    let err = migrator
        .rollback_to(RollbackTarget::Count(2))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::NotReversible { ref id } if id == "002"));

    // 003 was reversible but must not have been rolled back either
    assert_eq!(migrator.ledger().applied_ids().unwrap(), vec!["001", "002", "003"]);
    assert!(migrator.database().table_exists("labels").unwrap());

    // rolling back only the reversible tail still works
    assert_eq!(migrator.rollback_to(RollbackTarget::Count(1)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_backward_is_fatal() {
    let registry = registry(vec![
        reversible("001", "lists"),
        Migration::new("002", "create tasks", SchemaOp::create_table(table("tasks")))
            .with_backward(SchemaOp::drop_column("ghost", "id")),
    ]);
    let migrator = Migrator::new(&registry, Database::in_memory(), MigratorConfig::new());
    migrator.apply_pending().await.unwrap();

    let err = migrator
        .rollback_to(RollbackTarget::Count(2))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::Rollback { ref id, .. } if id == "002"));
    assert!(err.requires_manual_intervention());
    assert_eq!(migrator.ledger().applied_ids().unwrap(), vec!["001", "002"]);
}

#[tokio::test]
async fn test_count_larger_than_applied_is_clamped() {
    let registry = registry(vec![reversible("001", "lists"), reversible("002", "tasks")]);
    let migrator = Migrator::new(&registry, Database::in_memory(), MigratorConfig::new());
    migrator.apply_pending().await.unwrap();

    assert_eq!(migrator.rollback_to(RollbackTarget::Count(10)).await.unwrap(), 2);
    assert_eq!(migrator.rollback_to(RollbackTarget::Count(1)).await.unwrap(), 0);
    assert_eq!(migrator.rollback_to(RollbackTarget::Count(0)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_rollback_to_unapplied_or_unknown_target() {
    let registry = registry(vec![reversible("001", "lists"), reversible("002", "tasks")]);
    let migrator = Migrator::new(&registry, Database::in_memory(), MigratorConfig::new());

    // nothing applied yet
    assert_eq!(
        migrator
            .rollback_to(RollbackTarget::To("001".to_string()))
            .await
            .unwrap(),
        0
    );

    let err = migrator
        .rollback_to(RollbackTarget::To("999".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::UnknownMigration { ref id } if id == "999"));
}

#[tokio::test]
async fn test_parse_target_from_cli_argument() {
    let registry = registry(vec![reversible("001", "lists"), reversible("002", "tasks")]);
    let migrator = Migrator::new(&registry, Database::in_memory(), MigratorConfig::new());
    migrator.apply_pending().await.unwrap();

    let target = RollbackTarget::parse("001", &registry).unwrap();
    assert_eq!(target, RollbackTarget::To("001".to_string()));
    assert_eq!(migrator.rollback_to(target).await.unwrap(), 1);

    let target = RollbackTarget::parse("1", &registry).unwrap();
    assert_eq!(migrator.rollback_to(target).await.unwrap(), 1);
    assert!(migrator.ledger().applied_ids().unwrap().is_empty());
}
