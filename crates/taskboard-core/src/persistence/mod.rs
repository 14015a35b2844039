pub mod in_memory;

pub use in_memory::{InMemoryExecutorStore, StoreCall};

use crate::models::{
    AssociationOutcome, CoreError, NewTask, NewUser, ReconcilePlan, ReconcileReport,
    TaskExecutorAssociation, TaskExecutorRecord, TaskId, UserId, UserRecord,
};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// Storage seam for the task/executor join relation.
pub trait ExecutorStore: Send + Sync {
    /// Executors of one task, ordered by username.
    fn users_by_task(&self, task_id: TaskId) -> PersistenceResult<Vec<UserRecord>>;

    /// Executors of every listed task in a single query, ordered by username
    /// across the whole result.
    fn users_by_task_ids(&self, task_ids: &[TaskId])
    -> PersistenceResult<Vec<TaskExecutorRecord>>;

    fn insert_association(
        &self,
        association: &TaskExecutorAssociation,
    ) -> PersistenceResult<AssociationOutcome>;

    /// Returns the number of rows removed. Zero is not an error.
    fn delete_association(&self, association: &TaskExecutorAssociation)
    -> PersistenceResult<usize>;
}

/// Stores that can apply a whole reconcile plan inside one transaction.
pub trait AtomicExecutorStore: ExecutorStore {
    fn apply_plan(&self, plan: &ReconcilePlan) -> PersistenceResult<ReconcileReport>;
}

pub trait UserStore: Send + Sync {
    fn create_user(&self, user: &NewUser) -> PersistenceResult<UserId>;

    fn user(&self, user_id: UserId) -> PersistenceResult<Option<UserRecord>>;

    fn list_users(&self) -> PersistenceResult<Vec<UserRecord>>;

    fn delete_user(&self, user_id: UserId) -> PersistenceResult<()>;
}

pub trait TaskStore: Send + Sync {
    fn create_task(&self, task: &NewTask) -> PersistenceResult<TaskId>;

    fn task_exists(&self, task_id: TaskId) -> PersistenceResult<bool>;

    fn delete_task(&self, task_id: TaskId) -> PersistenceResult<()>;
}
