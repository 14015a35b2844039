use std::sync::Arc;

use taskboard_core::TaskExecutorService;
use taskboard_core::models::{
    AssociationOutcome, CoreErrorKind, DesiredExecutors, ProjectId, ReconcilePhase,
    TaskExecutorAssociation, TaskId, UserId,
};
use taskboard_core::persistence::{ExecutorStore, InMemoryExecutorStore, StoreCall};

fn store_with_users() -> Arc<InMemoryExecutorStore> {
    let store = Arc::new(InMemoryExecutorStore::new());
    store.add_user(2, "user2", Some("name2")).unwrap();
    store.add_user(3, "user3", Some("name3")).unwrap();
    store.add_user(4, "user4", None).unwrap();
    store.add_user(5, "aaron", None).unwrap();
    store
}

fn desired(ids: &[u64]) -> DesiredExecutors {
    ids.iter().map(|id| UserId(*id)).collect()
}

fn pair(task: u64, user: u64) -> TaskExecutorAssociation {
    TaskExecutorAssociation::new(TaskId(task), UserId(user))
}

#[test]
fn reconcile_issues_exactly_the_symmetric_difference() {
    let store = store_with_users();
    store.seed_association(TaskId(1), UserId(2)).unwrap();
    store.seed_association(TaskId(1), UserId(3)).unwrap();
    let service = TaskExecutorService::new(store.clone());

    service
        .save(ProjectId(1), TaskId(1), &desired(&[3, 4]))
        .unwrap();

    assert_eq!(
        store.calls().unwrap(),
        vec![
            StoreCall::UsersByTask(TaskId(1)),
            StoreCall::Insert(pair(1, 4)),
            StoreCall::Delete(pair(1, 2)),
        ]
    );
    assert_eq!(store.associated_user_ids(TaskId(1)).unwrap(), vec![UserId(3), UserId(4)]);
}

#[test]
fn second_identical_reconcile_performs_no_writes() {
    let store = store_with_users();
    let service = TaskExecutorService::new(store.clone());

    service
        .save(ProjectId(1), TaskId(1), &desired(&[2, 3]))
        .unwrap();
    assert_eq!(store.insert_calls().unwrap(), 2);
    store.clear_calls().unwrap();

    let report = service
        .save(ProjectId(1), TaskId(1), &desired(&[2, 3]))
        .unwrap();

    assert_eq!(report.writes(), 0);
    assert_eq!(store.insert_calls().unwrap(), 0);
    assert_eq!(store.delete_calls().unwrap(), 0);
    assert_eq!(store.associated_user_ids(TaskId(1)).unwrap(), vec![UserId(2), UserId(3)]);
}

#[test]
fn empty_bulk_request_does_not_query_storage() {
    let store = store_with_users();
    store.seed_association(TaskId(1), UserId(2)).unwrap();
    let service = TaskExecutorService::new(store.clone());

    let grouped = service.users_by_task_ids(&[]).unwrap();

    assert!(grouped.is_empty());
    assert_eq!(store.read_calls().unwrap(), 0);
}

#[test]
fn bulk_request_is_a_single_query_with_username_order_per_task() {
    let store = store_with_users();
    for user in [2, 3, 4, 5] {
        store.seed_association(TaskId(1), UserId(user)).unwrap();
    }
    store.seed_association(TaskId(2), UserId(3)).unwrap();
    let service = TaskExecutorService::new(store.clone());

    let grouped = service
        .users_by_task_ids(&[TaskId(1), TaskId(2), TaskId(3)])
        .unwrap();

    assert_eq!(store.read_calls().unwrap(), 1);
    let first: Vec<_> = grouped[&TaskId(1)]
        .iter()
        .map(|record| record.user.username.as_str())
        .collect();
    assert_eq!(first, vec!["aaron", "user2", "user3", "user4"]);
    assert_eq!(grouped[&TaskId(2)].len(), 1);
    assert_eq!(grouped[&TaskId(2)][0].task_id, TaskId(2));
    assert!(!grouped.contains_key(&TaskId(3)));
}

#[test]
fn placeholder_user_ids_are_never_written() {
    let store = store_with_users();
    let service = TaskExecutorService::new(store.clone());

    service
        .save(ProjectId(1), TaskId(1), &desired(&[0, 2, 0]))
        .unwrap();

    assert_eq!(store.calls().unwrap()[1..], [StoreCall::Insert(pair(1, 2))]);
    let error = service.associate_user(TaskId(1), UserId(0)).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}

#[test]
fn failing_insert_stops_before_any_dissociation() {
    let store = store_with_users();
    store.seed_association(TaskId(1), UserId(5)).unwrap();
    store.fail_insert_for(UserId(3)).unwrap();
    let service = TaskExecutorService::new(store.clone());

    let error = service
        .save(ProjectId(7), TaskId(1), &desired(&[2, 3, 4]))
        .unwrap_err();

    assert_eq!(error.phase, ReconcilePhase::Associate);
    assert_eq!(error.applied.project_id, ProjectId(7));
    assert_eq!(error.applied.associated, 1);
    assert_eq!(error.source.user, Some(UserId(3)));
    assert_eq!(store.insert_calls().unwrap(), 2);
    assert_eq!(store.delete_calls().unwrap(), 0);
    assert_eq!(store.associated_user_ids(TaskId(1)).unwrap(), vec![UserId(2), UserId(5)]);
}

#[test]
fn failing_delete_reports_dissociate_phase_with_applied_counts() {
    let store = store_with_users();
    for user in [2, 3, 4] {
        store.seed_association(TaskId(1), UserId(user)).unwrap();
    }
    store.fail_delete_for(UserId(3)).unwrap();
    let service = TaskExecutorService::new(store.clone());

    let error = service
        .save(ProjectId(1), TaskId(1), &desired(&[5]))
        .unwrap_err();

    assert_eq!(error.phase, ReconcilePhase::Dissociate);
    assert_eq!(error.applied.associated, 1);
    assert_eq!(error.applied.dissociated, 1);
    assert_eq!(
        store.associated_user_ids(TaskId(1)).unwrap(),
        vec![UserId(3), UserId(4), UserId(5)]
    );
}

#[test]
fn read_failure_is_surfaced_instead_of_empty_results() {
    let store = store_with_users();
    store.fail_reads(true).unwrap();
    let service = TaskExecutorService::new(store.clone());

    let read = service.users_by_task(TaskId(1)).unwrap_err();
    assert_eq!(read.kind, CoreErrorKind::StorageFailure);

    let error = service
        .save(ProjectId(1), TaskId(1), &desired(&[2]))
        .unwrap_err();
    assert_eq!(error.phase, ReconcilePhase::ReadCurrent);
    assert_eq!(store.insert_calls().unwrap(), 0);
}

#[test]
fn atomic_save_restores_previous_state_on_failure() {
    let store = store_with_users();
    store.seed_association(TaskId(1), UserId(4)).unwrap();
    store.fail_delete_for(UserId(4)).unwrap();
    let service = TaskExecutorService::new(store.clone());

    let error = service
        .save_atomic(ProjectId(1), TaskId(1), &desired(&[2, 3]))
        .unwrap_err();

    assert_eq!(error.phase, ReconcilePhase::Transaction);
    assert_eq!(store.associated_user_ids(TaskId(1)).unwrap(), vec![UserId(4)]);
}

#[test]
fn direct_association_of_existing_pair_is_reported_not_duplicated() {
    let store = store_with_users();
    let service = TaskExecutorService::new(store.clone());

    assert_eq!(
        service.associate_user(TaskId(1), UserId(2)).unwrap(),
        AssociationOutcome::Inserted
    );
    assert_eq!(
        service.associate_user(TaskId(1), UserId(2)).unwrap(),
        AssociationOutcome::AlreadyPresent
    );
    assert_eq!(store.associated_user_ids(TaskId(1)).unwrap(), vec![UserId(2)]);
}

#[test]
fn service_accepts_a_shared_trait_object_store() {
    let store = store_with_users();
    let shared: Arc<dyn ExecutorStore> = store.clone();
    let service = TaskExecutorService::new(shared);

    service
        .save(ProjectId(1), TaskId(9), &desired(&[4, 2]))
        .unwrap();

    let list = service.executor_list(TaskId(9)).unwrap();
    assert_eq!(
        list.into_iter().collect::<Vec<_>>(),
        vec![
            (UserId(2), "user2".to_string()),
            (UserId(4), "user4".to_string())
        ]
    );
}

#[test]
fn concurrently_added_executor_is_skipped_during_save() {
    let store = store_with_users();
    store
        .associate_after_next_read(TaskId(1), UserId(3))
        .unwrap();
    let service = TaskExecutorService::new(store.clone());

    let report = service
        .save(ProjectId(1), TaskId(1), &desired(&[2, 3]))
        .unwrap();

    assert_eq!(report.associated, 1);
    assert_eq!(report.already_present, 1);
    assert_eq!(report.writes(), 1);
    assert_eq!(store.insert_calls().unwrap(), 2);
    assert_eq!(
        store.associated_user_ids(TaskId(1)).unwrap(),
        vec![UserId(2), UserId(3)]
    );
}

#[test]
fn concurrently_added_executor_is_skipped_during_atomic_save() {
    let store = store_with_users();
    store.seed_association(TaskId(1), UserId(5)).unwrap();
    store
        .associate_after_next_read(TaskId(1), UserId(4))
        .unwrap();
    let service = TaskExecutorService::new(store.clone());

    let report = service
        .save_atomic(ProjectId(1), TaskId(1), &desired(&[2, 4]))
        .unwrap();

    assert_eq!(report.associated, 1);
    assert_eq!(report.already_present, 1);
    assert_eq!(report.dissociated, 1);
    assert_eq!(
        store.associated_user_ids(TaskId(1)).unwrap(),
        vec![UserId(2), UserId(4)]
    );
}
