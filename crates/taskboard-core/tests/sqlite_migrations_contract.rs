use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use taskboard_core::models::{CoreErrorKind, TaskId};
use taskboard_core::persistence::{ExecutorStore, MigrationStore};
use taskboard_core::sqlite::{SqliteStore, current_schema_version, migration, migrations};

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("taskboard-{test_name}-{nanos}.sqlite3"))
}

#[test]
fn schema_versions_are_contiguous_and_end_at_current_version() {
    let versions: Vec<i64> = migrations().iter().map(|entry| entry.version).collect();
    let expected: Vec<i64> = (1..=current_schema_version()).collect();
    assert_eq!(versions, expected);
    assert_eq!(
        migration(current_schema_version()).map(|entry| entry.name),
        migrations().last().map(|entry| entry.name)
    );
}

#[test]
fn initial_schema_creates_and_drops_every_executor_table() {
    let initial = migration(1).expect("initial migration must exist");
    assert_eq!(initial.name, "initial_executor_schema");

    for table in ["users", "tasks", "task_has_executors"] {
        assert!(
            initial.up_sql.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
            "up sql must create {table}"
        );
        assert!(
            initial.down_sql.contains(&format!("DROP TABLE IF EXISTS {table}")),
            "down sql must drop {table}"
        );
    }
}

#[test]
fn executor_join_relation_enforces_pair_uniqueness_and_cascades() {
    let initial = migration(1).expect("initial migration must exist");
    assert!(initial.up_sql.contains("UNIQUE (task_id, user_id)"));
    assert!(initial.up_sql.contains("REFERENCES tasks (id) ON DELETE CASCADE"));
    assert!(initial.up_sql.contains("REFERENCES users (id) ON DELETE CASCADE"));
}

#[test]
fn planned_migrations_include_versions_after_requested_version() {
    let store = SqliteStore::new(test_db_path("planned"));
    let planned = store.planned_migrations(0);

    assert!(!planned.is_empty());
    assert_eq!(planned[0].version, 1);
    assert!(store.planned_migrations(current_schema_version()).is_empty());
}

#[test]
fn migrating_up_and_down_tracks_schema_version() {
    let store = SqliteStore::new(test_db_path("up-down"));
    assert_eq!(store.current_version().unwrap(), 0);

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    // Re-applying the latest version is a no-op.
    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    store.apply_migration(0).unwrap();
    assert_eq!(store.current_version().unwrap(), 0);
}

#[test]
fn applying_undefined_migration_fails_with_storage_error() {
    let store = SqliteStore::new(test_db_path("undefined"));
    let error = store
        .apply_migration(current_schema_version() + 1)
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
}

#[test]
fn executor_operations_require_initialized_schema() {
    let store = SqliteStore::new(test_db_path("uninitialized"));
    let error = store.users_by_task(TaskId(1)).unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
    assert!(error.message.contains("not initialized"));
    assert_eq!(error.task, Some(TaskId(1)));
}
