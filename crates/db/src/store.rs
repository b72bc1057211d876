//! Storage ports used by the engine.
//!
//! The store is the single source of truth. Operations that must be atomic
//! (execution creation with counter updates, workflow version promotion) run
//! through a [`StoreTx`]; everything else is a plain call on [`Store`].

use async_trait::async_trait;

use crate::models::{
    Execution, ExecutionId, ExecutionStatus, Job, JobId, NewExecution, NewJob, NewWorkflow,
    Workflow, WorkflowId,
};
use crate::DbError;

#[async_trait]
pub trait Store: Send + Sync {
    /// Whether the backend serializes all writers (SQLite-like). The engine
    /// avoids creating executions while one is being processed on such
    /// backends.
    fn single_writer(&self) -> bool;

    /// Open a transaction. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DbError>;

    async fn list_enabled_workflows(&self) -> Result<Vec<Workflow>, DbError>;

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, DbError>;

    async fn delete_workflow(&self, id: WorkflowId) -> Result<(), DbError>;

    async fn get_execution(&self, id: ExecutionId) -> Result<Execution, DbError>;

    /// Oldest (`sort: id`) execution still `Queueing` whose workflow is
    /// enabled.
    async fn next_queueing_execution(&self) -> Result<Option<Execution>, DbError>;

    /// Move an execution to `status`. Backward moves are rejected with
    /// [`DbError::InvalidTransition`].
    async fn update_execution_status(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
    ) -> Result<Execution, DbError>;

    /// Delete an execution together with its jobs.
    async fn delete_execution(&self, id: ExecutionId) -> Result<(), DbError>;

    async fn insert_job(&self, job: NewJob) -> Result<Job, DbError>;

    /// Persist `status` and `result` of an existing job.
    async fn update_job(&self, job: &Job) -> Result<Job, DbError>;

    async fn get_job(&self, id: JobId) -> Result<Job, DbError>;

    /// Jobs of one execution ordered by id.
    async fn list_jobs(&self, execution_id: ExecutionId) -> Result<Vec<Job>, DbError>;
}

/// One open transaction.
#[async_trait]
pub trait StoreTx: Send {
    async fn get_workflow(&mut self, id: WorkflowId) -> Result<Workflow, DbError>;

    /// Insert a workflow version (`id == None`) or update one in place.
    async fn save_workflow(&mut self, workflow: NewWorkflow) -> Result<Workflow, DbError>;

    /// Force every current version of `key` other than `except` to
    /// `enabled = false, current = None`. Returns those versions as they
    /// were before the demotion.
    async fn demote_current(
        &mut self,
        key: &str,
        except: Option<WorkflowId>,
    ) -> Result<Vec<Workflow>, DbError>;

    /// Insert an execution. A reused `event_key` fails with
    /// [`DbError::Conflict`].
    async fn insert_execution(&mut self, execution: NewExecution) -> Result<Execution, DbError>;

    /// Increment `executed` on one workflow version and return the reloaded row.
    async fn increment_executed(&mut self, id: WorkflowId) -> Result<Workflow, DbError>;

    /// Recompute `all_executed` as the sum of `executed` over every version
    /// sharing `key`, persist it on all of them and return it.
    async fn sync_all_executed(&mut self, key: &str) -> Result<i64, DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}
