//! Task executor associations: reads, single-pair writes and the reconcile
//! that converges a task's executors onto a desired set.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::models::{
    AssociationOutcome, CoreError, DesiredExecutors, ExecutorList, ExecutorsByTask, ProjectId,
    ReconcileError, ReconcilePhase, ReconcilePlan, ReconcileReport, TaskExecutorAssociation,
    TaskId, UserId, UserRecord,
};
use crate::persistence::{AtomicExecutorStore, ExecutorStore, PersistenceResult};

pub struct TaskExecutorService<S: ExecutorStore + ?Sized> {
    store: Arc<S>,
}

impl<S: ExecutorStore + ?Sized> Clone for TaskExecutorService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ExecutorStore + ?Sized> TaskExecutorService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn users_by_task(&self, task_id: TaskId) -> PersistenceResult<Vec<UserRecord>> {
        let users = self.store.users_by_task(task_id)?;
        debug!(task_id = task_id.0, count = users.len(), "loaded task executors");
        Ok(users)
    }

    /// Executors for several tasks, grouped by task and ordered by username
    /// within each group. Tasks without executors are absent from the map.
    pub fn users_by_task_ids(&self, task_ids: &[TaskId]) -> PersistenceResult<ExecutorsByTask> {
        if task_ids.is_empty() {
            return Ok(ExecutorsByTask::new());
        }

        let mut records = self.store.users_by_task_ids(task_ids)?;
        records.sort_by(|left, right| left.user.username.cmp(&right.user.username));

        let mut grouped = ExecutorsByTask::new();
        for record in records {
            grouped.entry(record.task_id).or_default().push(record);
        }

        debug!(
            requested = task_ids.len(),
            with_executors = grouped.len(),
            "loaded executors for tasks"
        );
        Ok(grouped)
    }

    pub fn executor_list(&self, task_id: TaskId) -> PersistenceResult<ExecutorList> {
        Ok(self
            .users_by_task(task_id)?
            .into_iter()
            .map(|user| (user.id, user.username))
            .collect())
    }

    pub fn plan(
        &self,
        project_id: ProjectId,
        task_id: TaskId,
        desired: &DesiredExecutors,
    ) -> PersistenceResult<ReconcilePlan> {
        let current = self.executor_list(task_id)?;
        let plan = ReconcilePlan::between(project_id, task_id, &current, desired);
        debug!(
            project_id = project_id.0,
            task_id = task_id.0,
            current = current.len(),
            desired = desired.len(),
            to_associate = plan.to_associate.len(),
            to_dissociate = plan.to_dissociate.len(),
            "planned executor reconcile"
        );
        Ok(plan)
    }

    /// Associates missing executors, then dissociates removed ones. The first
    /// failing write stops the reconcile; earlier writes stay in place.
    pub fn save(
        &self,
        project_id: ProjectId,
        task_id: TaskId,
        desired: &DesiredExecutors,
    ) -> Result<ReconcileReport, ReconcileError> {
        let plan = self.plan_for_save(project_id, task_id, desired)?;
        let mut report = ReconcileReport::for_plan(&plan);

        for association in plan.associations() {
            match self.store.insert_association(&association) {
                Ok(AssociationOutcome::Inserted) => report.associated += 1,
                Ok(AssociationOutcome::AlreadyPresent) => {
                    warn!(
                        task_id = task_id.0,
                        user_id = association.user_id.0,
                        "executor was associated concurrently; skipping duplicate"
                    );
                    report.already_present += 1;
                }
                Err(source) => {
                    return Err(abort(ReconcilePhase::Associate, report, source, &association));
                }
            }
        }

        for association in plan.dissociations() {
            match self.store.delete_association(&association) {
                Ok(removed) => report.dissociated += removed,
                Err(source) => {
                    return Err(abort(ReconcilePhase::Dissociate, report, source, &association));
                }
            }
        }

        log_applied(&report);
        Ok(report)
    }

    pub fn associate_user(
        &self,
        task_id: TaskId,
        user_id: UserId,
    ) -> PersistenceResult<AssociationOutcome> {
        if user_id.is_placeholder() {
            return Err(CoreError::invalid_input("user id 0 is not a valid executor")
                .attributed(task_id, Some(user_id)));
        }
        let outcome = self
            .store
            .insert_association(&TaskExecutorAssociation::new(task_id, user_id))?;
        debug!(task_id = task_id.0, user_id = user_id.0, ?outcome, "associated executor");
        Ok(outcome)
    }

    /// Removing a pair that does not exist succeeds.
    pub fn dissociate_user(&self, task_id: TaskId, user_id: UserId) -> PersistenceResult<()> {
        let removed = self
            .store
            .delete_association(&TaskExecutorAssociation::new(task_id, user_id))?;
        debug!(task_id = task_id.0, user_id = user_id.0, removed, "dissociated executor");
        Ok(())
    }

    fn plan_for_save(
        &self,
        project_id: ProjectId,
        task_id: TaskId,
        desired: &DesiredExecutors,
    ) -> Result<ReconcilePlan, ReconcileError> {
        self.plan(project_id, task_id, desired).map_err(|source| {
            error!(
                task_id = task_id.0,
                phase = ReconcilePhase::ReadCurrent.as_str(),
                kind = ?source.kind,
                message = %source.message,
                "failed to read current executors"
            );
            ReconcileError {
                phase: ReconcilePhase::ReadCurrent,
                applied: ReconcileReport::empty(project_id, task_id),
                source,
            }
        })
    }
}

impl<S: AtomicExecutorStore + ?Sized> TaskExecutorService<S> {
    /// Same contract as [`save`](Self::save), but both phases are applied in
    /// one storage transaction, so a failure leaves the executors untouched.
    pub fn save_atomic(
        &self,
        project_id: ProjectId,
        task_id: TaskId,
        desired: &DesiredExecutors,
    ) -> Result<ReconcileReport, ReconcileError> {
        let plan = self.plan_for_save(project_id, task_id, desired)?;
        if plan.is_noop() {
            return Ok(ReconcileReport::for_plan(&plan));
        }

        match self.store.apply_plan(&plan) {
            Ok(report) => {
                log_applied(&report);
                Ok(report)
            }
            Err(source) => {
                error!(
                    task_id = task_id.0,
                    phase = ReconcilePhase::Transaction.as_str(),
                    kind = ?source.kind,
                    message = %source.message,
                    "executor reconcile rolled back"
                );
                Err(ReconcileError {
                    phase: ReconcilePhase::Transaction,
                    applied: ReconcileReport::for_plan(&plan),
                    source,
                })
            }
        }
    }
}

fn abort(
    phase: ReconcilePhase,
    applied: ReconcileReport,
    source: CoreError,
    association: &TaskExecutorAssociation,
) -> ReconcileError {
    let source = source.attributed(association.task_id, Some(association.user_id));
    error!(
        task_id = association.task_id.0,
        user_id = association.user_id.0,
        phase = phase.as_str(),
        associated = applied.associated,
        dissociated = applied.dissociated,
        kind = ?source.kind,
        message = %source.message,
        "executor reconcile aborted; earlier writes were kept"
    );
    ReconcileError {
        phase,
        applied,
        source,
    }
}

fn log_applied(report: &ReconcileReport) {
    info!(
        project_id = report.project_id.0,
        task_id = report.task_id.0,
        associated = report.associated,
        already_present = report.already_present,
        dissociated = report.dissociated,
        "executor reconcile applied"
    );
}
