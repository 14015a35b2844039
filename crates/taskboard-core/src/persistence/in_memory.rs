use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::models::{
    AssociationOutcome, CoreError, CoreErrorKind, ReconcilePlan, ReconcileReport,
    TaskExecutorAssociation, TaskExecutorRecord, TaskId, UserId, UserRecord,
};
use crate::persistence::{AtomicExecutorStore, ExecutorStore, PersistenceResult};

/// Every call the store received, in order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoreCall {
    UsersByTask(TaskId),
    UsersByTaskIds(Vec<TaskId>),
    Insert(TaskExecutorAssociation),
    Delete(TaskExecutorAssociation),
}

#[derive(Default)]
pub struct InMemoryExecutorStore {
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    users: BTreeMap<UserId, UserRecord>,
    associations: BTreeSet<(TaskId, UserId)>,
    calls: Vec<StoreCall>,
    failing_inserts: HashSet<UserId>,
    failing_deletes: HashSet<UserId>,
    failing_reads: bool,
    after_next_read: Vec<(TaskId, UserId)>,
}

impl InMemoryExecutorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(
        &self,
        id: u64,
        username: &str,
        display_name: Option<&str>,
    ) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        state.users.insert(
            UserId(id),
            UserRecord {
                id: UserId(id),
                username: username.to_string(),
                display_name: display_name.map(str::to_string),
            },
        );
        Ok(())
    }

    /// Seeds an association without recording a call.
    pub fn seed_association(&self, task_id: TaskId, user_id: UserId) -> PersistenceResult<()> {
        self.lock_state()?.associations.insert((task_id, user_id));
        Ok(())
    }

    /// Inserts the pair right after the next single-task read, as a
    /// concurrent writer racing a reconcile would.
    pub fn associate_after_next_read(
        &self,
        task_id: TaskId,
        user_id: UserId,
    ) -> PersistenceResult<()> {
        self.lock_state()?.after_next_read.push((task_id, user_id));
        Ok(())
    }

    pub fn fail_insert_for(&self, user_id: UserId) -> PersistenceResult<()> {
        self.lock_state()?.failing_inserts.insert(user_id);
        Ok(())
    }

    pub fn fail_delete_for(&self, user_id: UserId) -> PersistenceResult<()> {
        self.lock_state()?.failing_deletes.insert(user_id);
        Ok(())
    }

    pub fn fail_reads(&self, failing: bool) -> PersistenceResult<()> {
        self.lock_state()?.failing_reads = failing;
        Ok(())
    }

    pub fn calls(&self) -> PersistenceResult<Vec<StoreCall>> {
        Ok(self.lock_state()?.calls.clone())
    }

    pub fn clear_calls(&self) -> PersistenceResult<()> {
        self.lock_state()?.calls.clear();
        Ok(())
    }

    pub fn insert_calls(&self) -> PersistenceResult<usize> {
        self.count_calls(|call| matches!(call, StoreCall::Insert(_)))
    }

    pub fn delete_calls(&self) -> PersistenceResult<usize> {
        self.count_calls(|call| matches!(call, StoreCall::Delete(_)))
    }

    pub fn read_calls(&self) -> PersistenceResult<usize> {
        self.count_calls(|call| {
            matches!(call, StoreCall::UsersByTask(_) | StoreCall::UsersByTaskIds(_))
        })
    }

    pub fn associated_user_ids(&self, task_id: TaskId) -> PersistenceResult<Vec<UserId>> {
        let state = self.lock_state()?;
        Ok(state
            .associations
            .iter()
            .filter(|(task, _)| *task == task_id)
            .map(|(_, user)| *user)
            .collect())
    }

    fn count_calls(&self, predicate: impl Fn(&StoreCall) -> bool) -> PersistenceResult<usize> {
        let state = self.lock_state()?;
        Ok(state.calls.iter().filter(|call| predicate(call)).count())
    }

    fn lock_state(&self) -> PersistenceResult<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| CoreError {
            task: None,
            user: None,
            kind: CoreErrorKind::Internal,
            message: "in-memory executor store mutex poisoned".to_string(),
        })
    }
}

impl StoreState {
    fn user_record(&self, user_id: UserId) -> PersistenceResult<UserRecord> {
        self.users.get(&user_id).cloned().ok_or_else(|| {
            CoreError::storage(format!("association references unknown user '{user_id}'"))
        })
    }

    fn ensure_readable(&self) -> PersistenceResult<()> {
        if self.failing_reads {
            return Err(CoreError::storage("simulated read failure"));
        }
        Ok(())
    }

    fn insert(
        &mut self,
        association: &TaskExecutorAssociation,
    ) -> PersistenceResult<AssociationOutcome> {
        if self.failing_inserts.contains(&association.user_id) {
            return Err(CoreError::storage("simulated insert failure")
                .attributed(association.task_id, Some(association.user_id)));
        }
        if !self.users.contains_key(&association.user_id) {
            return Err(CoreError::storage(format!(
                "foreign key violation: unknown user '{}'",
                association.user_id
            ))
            .attributed(association.task_id, Some(association.user_id)));
        }

        if self
            .associations
            .insert((association.task_id, association.user_id))
        {
            Ok(AssociationOutcome::Inserted)
        } else {
            Ok(AssociationOutcome::AlreadyPresent)
        }
    }

    fn apply_plan(&mut self, plan: &ReconcilePlan) -> PersistenceResult<ReconcileReport> {
        let mut report = ReconcileReport::for_plan(plan);
        for association in plan.associations() {
            self.calls.push(StoreCall::Insert(association));
            match self.insert(&association)? {
                AssociationOutcome::Inserted => report.associated += 1,
                AssociationOutcome::AlreadyPresent => report.already_present += 1,
            }
        }
        for association in plan.dissociations() {
            self.calls.push(StoreCall::Delete(association));
            report.dissociated += self.delete(&association)?;
        }
        Ok(report)
    }

    fn delete(&mut self, association: &TaskExecutorAssociation) -> PersistenceResult<usize> {
        if self.failing_deletes.contains(&association.user_id) {
            return Err(CoreError::storage("simulated delete failure")
                .attributed(association.task_id, Some(association.user_id)));
        }
        let removed = self
            .associations
            .remove(&(association.task_id, association.user_id));
        Ok(usize::from(removed))
    }
}

impl ExecutorStore for InMemoryExecutorStore {
    fn users_by_task(&self, task_id: TaskId) -> PersistenceResult<Vec<UserRecord>> {
        let mut state = self.lock_state()?;
        state.calls.push(StoreCall::UsersByTask(task_id));
        state.ensure_readable()?;

        let mut users = state
            .associations
            .iter()
            .filter(|(task, _)| *task == task_id)
            .map(|(_, user_id)| state.user_record(*user_id))
            .collect::<PersistenceResult<Vec<_>>>()?;
        users.sort_by(|left, right| {
            left.username
                .cmp(&right.username)
                .then(left.id.cmp(&right.id))
        });

        let raced = std::mem::take(&mut state.after_next_read);
        state.associations.extend(raced);
        Ok(users)
    }

    fn users_by_task_ids(
        &self,
        task_ids: &[TaskId],
    ) -> PersistenceResult<Vec<TaskExecutorRecord>> {
        let mut state = self.lock_state()?;
        state.calls.push(StoreCall::UsersByTaskIds(task_ids.to_vec()));
        state.ensure_readable()?;

        let requested: HashSet<TaskId> = task_ids.iter().copied().collect();
        let mut records = state
            .associations
            .iter()
            .filter(|(task, _)| requested.contains(task))
            .map(|(task_id, user_id)| {
                Ok(TaskExecutorRecord {
                    user: state.user_record(*user_id)?,
                    task_id: *task_id,
                })
            })
            .collect::<PersistenceResult<Vec<_>>>()?;
        records.sort_by(|left, right| {
            left.user
                .username
                .cmp(&right.user.username)
                .then(left.task_id.cmp(&right.task_id))
        });
        Ok(records)
    }

    fn insert_association(
        &self,
        association: &TaskExecutorAssociation,
    ) -> PersistenceResult<AssociationOutcome> {
        let mut state = self.lock_state()?;
        state.calls.push(StoreCall::Insert(*association));
        state.insert(association)
    }

    fn delete_association(
        &self,
        association: &TaskExecutorAssociation,
    ) -> PersistenceResult<usize> {
        let mut state = self.lock_state()?;
        state.calls.push(StoreCall::Delete(*association));
        state.delete(association)
    }
}

impl AtomicExecutorStore for InMemoryExecutorStore {
    fn apply_plan(&self, plan: &ReconcilePlan) -> PersistenceResult<ReconcileReport> {
        let mut state = self.lock_state()?;
        let snapshot = state.associations.clone();

        let outcome = state.apply_plan(plan);
        if outcome.is_err() {
            state.associations = snapshot;
        }
        outcome
    }
}
