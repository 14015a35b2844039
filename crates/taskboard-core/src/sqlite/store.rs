use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use rusqlite::types::Value;
use rusqlite::vtab::array;
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::StoreConfig;
use crate::models::{
    AssociationOutcome, CoreError, CoreErrorKind, NewTask, NewUser, ReconcilePlan,
    ReconcileReport, TaskExecutorAssociation, TaskExecutorRecord, TaskId, UserId, UserRecord,
};
use crate::persistence::{
    AtomicExecutorStore, ExecutorStore, MigrationStore, PersistenceResult, TaskStore, UserStore,
};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "taskboard_schema_migrations";

const INSERT_ASSOCIATION_SQL: &str = "
INSERT INTO task_has_executors (task_id, user_id)
VALUES (?1, ?2)
ON CONFLICT (task_id, user_id) DO NOTHING
";

const DELETE_ASSOCIATION_SQL: &str =
    "DELETE FROM task_has_executors WHERE task_id = ?1 AND user_id = ?2";

pub struct SqliteStore {
    config: StoreConfig,
}

impl SqliteStore {
    pub fn new(database_path: impl Into<std::path::PathBuf>) -> Self {
        Self::with_config(StoreConfig::new(database_path))
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn database_path(&self) -> &Path {
        &self.config.database_path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.config)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        if target_version > 0 && migration(target_version).is_none() {
            return Err(storage_error_text(
                "apply_migration",
                format!("migration version '{target_version}' is not defined"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version == current_version {
                // DDL is CREATE ... IF NOT EXISTS, so replaying repairs a
                // schema whose version row survived without its tables.
                for version in 1..=target_version {
                    connection.execute_batch(defined_migration(version)?.up_sql)?;
                }
                return Ok(());
            }

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            }

            Ok(())
        })
    }
}

impl ExecutorStore for SqliteStore {
    fn users_by_task(&self, task_id: TaskId) -> PersistenceResult<Vec<UserRecord>> {
        self.with_connection("users_by_task", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT u.id, u.username, u.name
FROM users u
JOIN task_has_executors te ON te.user_id = u.id
WHERE te.task_id = ?1
ORDER BY u.username ASC, u.id ASC
",
            )?;

            let rows = statement.query_map(params![id_to_i64(task_id.0)?], |row| {
                let id: i64 = row.get(0)?;
                Ok(UserRecord {
                    id: UserId(i64_to_u64(id)?),
                    username: row.get(1)?,
                    display_name: row.get(2)?,
                })
            })?;

            rows.collect()
        })
        .map_err(|error| error.attributed(task_id, None))
    }

    fn users_by_task_ids(
        &self,
        task_ids: &[TaskId],
    ) -> PersistenceResult<Vec<TaskExecutorRecord>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }

        let unique: BTreeSet<TaskId> = task_ids.iter().copied().collect();

        self.with_connection("users_by_task_ids", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT u.id, u.username, u.name, te.task_id
FROM users u
JOIN task_has_executors te ON te.user_id = u.id
WHERE te.task_id IN rarray(?1)
ORDER BY u.username ASC, te.task_id ASC
",
            )?;

            let bound = unique
                .iter()
                .map(|task_id| id_to_i64(task_id.0).map(Value::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let rows = statement.query_map(params![Rc::new(bound)], |row| {
                let id: i64 = row.get(0)?;
                let task_id: i64 = row.get(3)?;
                Ok(TaskExecutorRecord {
                    user: UserRecord {
                        id: UserId(i64_to_u64(id)?),
                        username: row.get(1)?,
                        display_name: row.get(2)?,
                    },
                    task_id: TaskId(i64_to_u64(task_id)?),
                })
            })?;

            rows.collect()
        })
    }

    fn insert_association(
        &self,
        association: &TaskExecutorAssociation,
    ) -> PersistenceResult<AssociationOutcome> {
        self.with_connection("insert_association", |connection| {
            ensure_schema_ready(connection)?;
            insert_association_row(connection, association)
        })
        .map_err(|error| error.attributed(association.task_id, Some(association.user_id)))
    }

    fn delete_association(
        &self,
        association: &TaskExecutorAssociation,
    ) -> PersistenceResult<usize> {
        self.with_connection("delete_association", |connection| {
            ensure_schema_ready(connection)?;
            delete_association_row(connection, association)
        })
        .map_err(|error| error.attributed(association.task_id, Some(association.user_id)))
    }
}

impl AtomicExecutorStore for SqliteStore {
    fn apply_plan(&self, plan: &ReconcilePlan) -> PersistenceResult<ReconcileReport> {
        self.with_connection("apply_plan", |connection| {
            ensure_schema_ready(connection)?;
            let mut report = ReconcileReport::for_plan(plan);
            let transaction = connection.transaction()?;

            for association in plan.associations() {
                match insert_association_row(&transaction, &association)? {
                    AssociationOutcome::Inserted => report.associated += 1,
                    AssociationOutcome::AlreadyPresent => report.already_present += 1,
                }
            }
            for association in plan.dissociations() {
                report.dissociated += delete_association_row(&transaction, &association)?;
            }

            transaction.commit()?;
            Ok(report)
        })
        .map_err(|error| error.attributed(plan.task_id, None))
    }
}

impl UserStore for SqliteStore {
    fn create_user(&self, user: &NewUser) -> PersistenceResult<UserId> {
        let username = user.username.trim();
        if username.is_empty() {
            return Err(CoreError::invalid_input("username must not be empty"));
        }

        self.with_connection("create_user", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "INSERT INTO users (username, name) VALUES (?1, ?2)",
                params![username, user.display_name.as_deref()],
            )?;
            Ok(UserId(i64_to_u64(connection.last_insert_rowid())?))
        })
    }

    fn user(&self, user_id: UserId) -> PersistenceResult<Option<UserRecord>> {
        self.with_connection("user", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    "SELECT id, username, name FROM users WHERE id = ?1",
                    params![id_to_i64(user_id.0)?],
                    |row| {
                        let id: i64 = row.get(0)?;
                        Ok(UserRecord {
                            id: UserId(i64_to_u64(id)?),
                            username: row.get(1)?,
                            display_name: row.get(2)?,
                        })
                    },
                )
                .optional()
        })
    }

    fn list_users(&self) -> PersistenceResult<Vec<UserRecord>> {
        self.with_connection("list_users", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement =
                connection.prepare("SELECT id, username, name FROM users ORDER BY username, id")?;
            let rows = statement.query_map([], |row| {
                let id: i64 = row.get(0)?;
                Ok(UserRecord {
                    id: UserId(i64_to_u64(id)?),
                    username: row.get(1)?,
                    display_name: row.get(2)?,
                })
            })?;

            rows.collect()
        })
    }

    fn delete_user(&self, user_id: UserId) -> PersistenceResult<()> {
        self.with_connection("delete_user", |connection| {
            ensure_schema_ready(connection)?;
            let deleted = connection.execute(
                "DELETE FROM users WHERE id = ?1",
                params![id_to_i64(user_id.0)?],
            )?;
            if deleted == 0 {
                return Err(storage_error_sqlite("user id was not found for delete"));
            }
            Ok(())
        })
    }
}

impl TaskStore for SqliteStore {
    fn create_task(&self, task: &NewTask) -> PersistenceResult<TaskId> {
        self.with_connection("create_task", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "INSERT INTO tasks (project_id, title) VALUES (?1, ?2)",
                params![id_to_i64(task.project_id.0)?, task.title.as_str()],
            )?;
            Ok(TaskId(i64_to_u64(connection.last_insert_rowid())?))
        })
    }

    fn task_exists(&self, task_id: TaskId) -> PersistenceResult<bool> {
        self.with_connection("task_exists", |connection| {
            ensure_schema_ready(connection)?;
            let exists: i64 = connection.query_row(
                "SELECT EXISTS (SELECT 1 FROM tasks WHERE id = ?1)",
                params![id_to_i64(task_id.0)?],
                |row| row.get(0),
            )?;
            Ok(exists != 0)
        })
    }

    fn delete_task(&self, task_id: TaskId) -> PersistenceResult<()> {
        self.with_connection("delete_task", |connection| {
            ensure_schema_ready(connection)?;
            let deleted = connection.execute(
                "DELETE FROM tasks WHERE id = ?1",
                params![id_to_i64(task_id.0)?],
            )?;
            if deleted == 0 {
                return Err(storage_error_sqlite("task id was not found for delete"));
            }
            Ok(())
        })
    }
}

fn insert_association_row(
    connection: &Connection,
    association: &TaskExecutorAssociation,
) -> rusqlite::Result<AssociationOutcome> {
    let inserted = connection.execute(
        INSERT_ASSOCIATION_SQL,
        params![
            id_to_i64(association.task_id.0)?,
            id_to_i64(association.user_id.0)?,
        ],
    )?;
    Ok(if inserted == 0 {
        AssociationOutcome::AlreadyPresent
    } else {
        AssociationOutcome::Inserted
    })
}

fn delete_association_row(
    connection: &Connection,
    association: &TaskExecutorAssociation,
) -> rusqlite::Result<usize> {
    connection.execute(
        DELETE_ASSOCIATION_SQL,
        params![
            id_to_i64(association.task_id.0)?,
            id_to_i64(association.user_id.0)?,
        ],
    )
}

fn open_connection(config: &StoreConfig) -> rusqlite::Result<Connection> {
    if let Some(parent) = config
        .database_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    let connection = Connection::open(&config.database_path)?;
    connection.busy_timeout(config.busy_timeout)?;
    connection.pragma_update(None, "foreign_keys", true)?;
    array::load_module(&connection)?;
    Ok(connection)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version <= 0 {
        return Err(storage_error_sqlite(
            "database schema is not initialized; apply migrations before executor operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn id_to_i64(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("identifier exceeds i64 range"))
}

fn i64_to_u64(value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| storage_error_sqlite("negative identifier in sqlite record"))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError {
        task: None,
        user: None,
        kind: CoreErrorKind::StorageFailure,
        message: format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    }
}
