//! Postgres-backed [`Store`].
//!
//! Thin adapter over the `repository` functions. Postgres handles
//! concurrent writers, so executions may be created while another one is
//! being processed.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use crate::models::{
    Execution, ExecutionId, ExecutionStatus, Job, JobId, NewExecution, NewJob, NewWorkflow,
    Workflow, WorkflowId,
};
use crate::pool::DbPool;
use crate::repository::{executions, jobs, workflows};
use crate::store::{Store, StoreTx};
use crate::DbError;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    fn single_writer(&self) -> bool {
        false
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn list_enabled_workflows(&self) -> Result<Vec<Workflow>, DbError> {
        workflows::list_enabled_workflows(&self.pool).await
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, DbError> {
        workflows::get_workflow(&self.pool, id).await
    }

    async fn delete_workflow(&self, id: WorkflowId) -> Result<(), DbError> {
        workflows::delete_workflow(&self.pool, id).await
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Execution, DbError> {
        executions::get_execution(&self.pool, id).await
    }

    async fn next_queueing_execution(&self) -> Result<Option<Execution>, DbError> {
        executions::next_queueing_execution(&self.pool).await
    }

    async fn update_execution_status(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
    ) -> Result<Execution, DbError> {
        if let Some(execution) = executions::advance_execution_status(&self.pool, id, status).await? {
            return Ok(execution);
        }
        let current = executions::get_execution(&self.pool, id).await?;
        Err(DbError::InvalidTransition {
            from: current.status,
            to: status,
        })
    }

    async fn delete_execution(&self, id: ExecutionId) -> Result<(), DbError> {
        executions::delete_execution(&self.pool, id).await
    }

    async fn insert_job(&self, job: NewJob) -> Result<Job, DbError> {
        jobs::insert_job(&self.pool, &job).await
    }

    async fn update_job(&self, job: &Job) -> Result<Job, DbError> {
        jobs::update_job(&self.pool, job).await
    }

    async fn get_job(&self, id: JobId) -> Result<Job, DbError> {
        jobs::get_job(&self.pool, id).await
    }

    async fn list_jobs(&self, execution_id: ExecutionId) -> Result<Vec<Job>, DbError> {
        jobs::list_jobs(&self.pool, execution_id).await
    }
}

/// An open Postgres transaction. Dropping it without `commit` rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn get_workflow(&mut self, id: WorkflowId) -> Result<Workflow, DbError> {
        workflows::get_workflow(&mut *self.tx, id).await
    }

    async fn save_workflow(&mut self, workflow: NewWorkflow) -> Result<Workflow, DbError> {
        match workflow.id {
            Some(id) => workflows::update_workflow(&mut *self.tx, id, &workflow).await,
            None => workflows::create_workflow(&mut *self.tx, &workflow).await,
        }
    }

    async fn demote_current(
        &mut self,
        key: &str,
        except: Option<WorkflowId>,
    ) -> Result<Vec<Workflow>, DbError> {
        workflows::demote_current(&mut *self.tx, key, except).await
    }

    async fn insert_execution(&mut self, execution: NewExecution) -> Result<Execution, DbError> {
        executions::create_execution(&mut *self.tx, &execution).await
    }

    async fn increment_executed(&mut self, id: WorkflowId) -> Result<Workflow, DbError> {
        workflows::increment_executed(&mut *self.tx, id).await
    }

    async fn sync_all_executed(&mut self, key: &str) -> Result<i64, DbError> {
        workflows::sync_all_executed(&mut *self.tx, key).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
