//! In-memory store implementation.
//!
//! Everything lives behind one `tokio::sync::Mutex`. A transaction owns the
//! lock for its whole lifetime together with a snapshot of the state taken
//! at `begin`, which is restored unless the transaction commits. Plain
//! [`Store`] calls made while a transaction is open wait for it to finish.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{
    Execution, ExecutionId, ExecutionStatus, Job, JobId, NewExecution, NewJob, NewWorkflow,
    Workflow, WorkflowId,
};
use crate::store::{Store, StoreTx};
use crate::DbError;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    workflows: BTreeMap<WorkflowId, Workflow>,
    executions: BTreeMap<ExecutionId, Execution>,
    jobs: BTreeMap<JobId, Job>,
    next_workflow_id: i64,
    next_execution_id: i64,
    next_job_id: i64,
}

impl MemoryState {
    fn allocate(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn workflow(&self, id: WorkflowId) -> Result<Workflow, DbError> {
        self.workflows.get(&id).cloned().ok_or(DbError::NotFound)
    }

    fn save_workflow(&mut self, new: NewWorkflow) -> Result<Workflow, DbError> {
        let now = Utc::now();
        let workflow = match new.id {
            Some(id) => {
                let existing = self.workflows.get(&id).ok_or(DbError::NotFound)?;
                Workflow {
                    id,
                    key: new.key,
                    title: new.title,
                    trigger_type: new.trigger_type,
                    config: new.config,
                    enabled: new.enabled,
                    current: new.current,
                    sync: new.sync,
                    options: new.options,
                    nodes: new.nodes,
                    executed: existing.executed,
                    all_executed: existing.all_executed,
                    created_at: existing.created_at,
                    updated_at: now,
                }
            }
            None => Workflow {
                id: Self::allocate(&mut self.next_workflow_id),
                key: new.key,
                title: new.title,
                trigger_type: new.trigger_type,
                config: new.config,
                enabled: new.enabled,
                current: new.current,
                sync: new.sync,
                options: new.options,
                nodes: new.nodes,
                executed: 0,
                all_executed: 0,
                created_at: now,
                updated_at: now,
            },
        };

        // Mirrors the partial unique index on `workflows(key) WHERE current`.
        if workflow.is_current()
            && self
                .workflows
                .values()
                .any(|w| w.key == workflow.key && w.id != workflow.id && w.is_current())
        {
            return Err(DbError::Conflict(format!(
                "workflow key '{}' already has a current version",
                workflow.key
            )));
        }

        self.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }
}

/// Process-local [`Store`].
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    single_writer: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            single_writer: true,
        }
    }

    /// Report multi-writer semantics so execution creation may overlap with
    /// processing.
    pub fn multi_writer(mut self) -> Self {
        self.single_writer = false;
        self
    }

    /// All executions ordered by id.
    pub async fn executions(&self) -> Vec<Execution> {
        self.state.lock().await.executions.values().cloned().collect()
    }

    /// All workflow versions ordered by id.
    pub async fn workflows(&self) -> Vec<Workflow> {
        self.state.lock().await.workflows.values().cloned().collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn single_writer(&self) -> bool {
        self.single_writer
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, DbError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            snapshot: Some(snapshot),
        }))
    }

    async fn list_enabled_workflows(&self) -> Result<Vec<Workflow>, DbError> {
        let state = self.state.lock().await;
        Ok(state.workflows.values().filter(|w| w.enabled).cloned().collect())
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, DbError> {
        self.state.lock().await.workflow(id)
    }

    async fn delete_workflow(&self, id: WorkflowId) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        state.workflows.remove(&id).ok_or(DbError::NotFound)?;
        let executions: Vec<ExecutionId> = state
            .executions
            .values()
            .filter(|e| e.workflow_id == id)
            .map(|e| e.id)
            .collect();
        for execution_id in executions {
            state.executions.remove(&execution_id);
            state.jobs.retain(|_, j| j.execution_id != execution_id);
        }
        Ok(())
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Execution, DbError> {
        let state = self.state.lock().await;
        state.executions.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn next_queueing_execution(&self) -> Result<Option<Execution>, DbError> {
        let state = self.state.lock().await;
        let next = state
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Queueing)
            .find(|e| state.workflows.get(&e.workflow_id).is_some_and(|w| w.enabled))
            .cloned();
        Ok(next)
    }

    async fn update_execution_status(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
    ) -> Result<Execution, DbError> {
        let mut state = self.state.lock().await;
        let execution = state.executions.get_mut(&id).ok_or(DbError::NotFound)?;
        if !execution.status.can_transition_to(status) {
            return Err(DbError::InvalidTransition {
                from: execution.status,
                to: status,
            });
        }
        execution.status = status;
        execution.updated_at = Utc::now();
        Ok(execution.clone())
    }

    async fn delete_execution(&self, id: ExecutionId) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        state.executions.remove(&id).ok_or(DbError::NotFound)?;
        state.jobs.retain(|_, j| j.execution_id != id);
        Ok(())
    }

    async fn insert_job(&self, job: NewJob) -> Result<Job, DbError> {
        let mut state = self.state.lock().await;
        if !state.executions.contains_key(&job.execution_id) {
            return Err(DbError::NotFound);
        }
        let now = Utc::now();
        let row = Job {
            id: MemoryState::allocate(&mut state.next_job_id),
            execution_id: job.execution_id,
            node_id: job.node_id,
            node_key: job.node_key,
            upstream_id: job.upstream_id,
            status: job.status,
            result: job.result,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_job(&self, job: &Job) -> Result<Job, DbError> {
        let mut state = self.state.lock().await;
        let row = state.jobs.get_mut(&job.id).ok_or(DbError::NotFound)?;
        row.status = job.status;
        row.result = job.result.clone();
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, DbError> {
        let state = self.state.lock().await;
        state.jobs.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn list_jobs(&self, execution_id: ExecutionId) -> Result<Vec<Job>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.execution_id == execution_id)
            .cloned()
            .collect())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    /// Restored on drop unless the transaction committed.
    snapshot: Option<MemoryState>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_workflow(&mut self, id: WorkflowId) -> Result<Workflow, DbError> {
        self.guard.workflow(id)
    }

    async fn save_workflow(&mut self, workflow: NewWorkflow) -> Result<Workflow, DbError> {
        self.guard.save_workflow(workflow)
    }

    async fn demote_current(
        &mut self,
        key: &str,
        except: Option<WorkflowId>,
    ) -> Result<Vec<Workflow>, DbError> {
        let now = Utc::now();
        let mut demoted = Vec::new();
        for workflow in self.guard.workflows.values_mut() {
            if workflow.key == key && Some(workflow.id) != except && workflow.is_current() {
                demoted.push(workflow.clone());
                workflow.enabled = false;
                workflow.current = None;
                workflow.updated_at = now;
            }
        }
        Ok(demoted)
    }

    async fn insert_execution(&mut self, execution: NewExecution) -> Result<Execution, DbError> {
        let state = &mut *self.guard;
        if state.executions.values().any(|e| e.event_key == execution.event_key) {
            return Err(DbError::Conflict(format!(
                "event key '{}' already used",
                execution.event_key
            )));
        }
        if !state.workflows.contains_key(&execution.workflow_id) {
            return Err(DbError::NotFound);
        }
        let now = Utc::now();
        let row = Execution {
            id: MemoryState::allocate(&mut state.next_execution_id),
            workflow_id: execution.workflow_id,
            key: execution.key,
            event_key: execution.event_key,
            context: execution.context,
            status: execution.status,
            created_at: now,
            updated_at: now,
        };
        state.executions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn increment_executed(&mut self, id: WorkflowId) -> Result<Workflow, DbError> {
        let workflow = self.guard.workflows.get_mut(&id).ok_or(DbError::NotFound)?;
        workflow.executed += 1;
        workflow.updated_at = Utc::now();
        Ok(workflow.clone())
    }

    async fn sync_all_executed(&mut self, key: &str) -> Result<i64, DbError> {
        let total: i64 = self
            .guard
            .workflows
            .values()
            .filter(|w| w.key == key)
            .map(|w| w.executed)
            .sum();
        for workflow in self.guard.workflows.values_mut().filter(|w| w.key == key) {
            workflow.all_executed = total;
        }
        Ok(total)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), DbError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        // Drop restores the snapshot.
        Ok(())
    }
}
