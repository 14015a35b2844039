use serde::{Deserialize, Serialize};

use crate::models::{ProjectId, TaskId, UserId};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
}

/// An executor row returned by bulk lookups, tagged with the task it belongs to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutorRecord {
    #[serde(flatten)]
    pub user: UserRecord,
    pub task_id: TaskId,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub display_name: Option<String>,
}

impl NewUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewTask {
    pub project_id: ProjectId,
    pub title: String,
}
