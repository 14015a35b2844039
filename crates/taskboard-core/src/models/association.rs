use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{TaskExecutorRecord, TaskId, UserId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskExecutorAssociation {
    pub task_id: TaskId,
    pub user_id: UserId,
}

impl TaskExecutorAssociation {
    pub fn new(task_id: TaskId, user_id: UserId) -> Self {
        Self { task_id, user_id }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AssociationOutcome {
    Inserted,
    /// The pair already existed; the uniqueness constraint absorbed the write.
    AlreadyPresent,
}

/// User id to username dictionary for one task.
pub type ExecutorList = BTreeMap<UserId, String>;

/// Executors grouped by task. Tasks without executors have no entry.
pub type ExecutorsByTask = BTreeMap<TaskId, Vec<TaskExecutorRecord>>;
