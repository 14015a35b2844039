pub mod association;
pub mod error;
pub mod ids;
pub mod reconcile;
pub mod user;

pub use association::{
    AssociationOutcome, ExecutorList, ExecutorsByTask, TaskExecutorAssociation,
};
pub use error::{CoreError, CoreErrorKind};
pub use ids::{ProjectId, TaskId, UserId};
pub use reconcile::{
    DesiredExecutors, ReconcileError, ReconcilePhase, ReconcilePlan, ReconcileReport,
};
pub use user::{NewTask, NewUser, TaskExecutorRecord, UserRecord};
