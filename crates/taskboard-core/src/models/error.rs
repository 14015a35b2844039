use thiserror::Error;

use crate::models::{TaskId, UserId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub task: Option<TaskId>,
    pub user: Option<UserId>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: None,
            user: None,
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::InvalidInput, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::StorageFailure, message)
    }

    /// Attaches task/user attribution unless the error already carries it.
    pub fn attributed(mut self, task: TaskId, user: Option<UserId>) -> Self {
        self.task.get_or_insert(task);
        if self.user.is_none() {
            self.user = user;
        }
        self
    }
}
