use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use crate::models::{
    CoreError, ExecutorList, ProjectId, TaskExecutorAssociation, TaskId, UserId,
};

/// Desired executor set for a task, with placeholders removed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DesiredExecutors {
    users: Vec<UserId>,
}

impl DesiredExecutors {
    pub fn from_user_ids(user_ids: impl IntoIterator<Item = UserId>) -> Self {
        let mut seen = HashSet::new();
        let users = user_ids
            .into_iter()
            .filter(|user_id| !user_id.is_placeholder())
            .filter(|user_id| seen.insert(*user_id))
            .collect();
        Self { users }
    }

    /// Parses raw selection values as submitted by a form. Blank values and
    /// `"0"` are empty-selection placeholders and are dropped.
    pub fn from_form_values<I, S>(values: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut user_ids = Vec::new();
        for value in values {
            let raw = value.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            let parsed = raw.parse::<u64>().map_err(|_| {
                CoreError::invalid_input(format!("executor selection '{raw}' is not a user id"))
            })?;
            user_ids.push(UserId(parsed));
        }
        Ok(Self::from_user_ids(user_ids))
    }

    pub fn user_ids(&self) -> &[UserId] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<UserId> for DesiredExecutors {
    fn from_iter<T: IntoIterator<Item = UserId>>(iter: T) -> Self {
        Self::from_user_ids(iter)
    }
}

/// Writes needed to converge a task's executors onto a desired set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReconcilePlan {
    pub project_id: ProjectId,
    pub task_id: TaskId,
    /// In desired order.
    pub to_associate: Vec<UserId>,
    /// In ascending user id order.
    pub to_dissociate: Vec<UserId>,
}

impl ReconcilePlan {
    pub fn between(
        project_id: ProjectId,
        task_id: TaskId,
        current: &ExecutorList,
        desired: &DesiredExecutors,
    ) -> Self {
        let wanted: HashSet<UserId> = desired.user_ids().iter().copied().collect();

        let to_associate = desired
            .user_ids()
            .iter()
            .copied()
            .filter(|user_id| !current.contains_key(user_id))
            .collect();
        let to_dissociate = current
            .keys()
            .copied()
            .filter(|user_id| !wanted.contains(user_id))
            .collect();

        Self {
            project_id,
            task_id,
            to_associate,
            to_dissociate,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.to_associate.is_empty() && self.to_dissociate.is_empty()
    }

    pub fn associations(&self) -> impl Iterator<Item = TaskExecutorAssociation> + '_ {
        self.to_associate
            .iter()
            .map(|user_id| TaskExecutorAssociation::new(self.task_id, *user_id))
    }

    pub fn dissociations(&self) -> impl Iterator<Item = TaskExecutorAssociation> + '_ {
        self.to_dissociate
            .iter()
            .map(|user_id| TaskExecutorAssociation::new(self.task_id, *user_id))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    ReadCurrent,
    Associate,
    Dissociate,
    /// Both phases inside one storage transaction that was rolled back.
    Transaction,
}

impl ReconcilePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadCurrent => "read_current",
            Self::Associate => "associate",
            Self::Dissociate => "dissociate",
            Self::Transaction => "transaction",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub project_id: ProjectId,
    pub task_id: TaskId,
    pub associated: usize,
    pub already_present: usize,
    pub dissociated: usize,
}

impl ReconcileReport {
    pub fn empty(project_id: ProjectId, task_id: TaskId) -> Self {
        Self {
            project_id,
            task_id,
            associated: 0,
            already_present: 0,
            dissociated: 0,
        }
    }

    pub fn for_plan(plan: &ReconcilePlan) -> Self {
        Self::empty(plan.project_id, plan.task_id)
    }

    /// Rows actually written: inserts that landed plus deletes issued.
    pub fn writes(&self) -> usize {
        self.associated + self.dissociated
    }
}

/// A reconcile that stopped part way. `applied` holds the writes that were
/// committed before the failure; they are not undone. After a failed
/// `Transaction` phase nothing was committed.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error(
    "reconcile of task {} stopped in {} phase: {source}",
    .applied.task_id,
    .phase.as_str()
)]
pub struct ReconcileError {
    pub phase: ReconcilePhase,
    pub applied: ReconcileReport,
    #[source]
    pub source: CoreError,
}
