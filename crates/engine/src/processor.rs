//! Per-execution state machine.
//!
//! A `Processor` walks one execution's flow graph node by node:
//! 1. Moves a `queueing` execution to `started`.
//! 2. Runs each node's instruction and persists the resulting job.
//! 3. Follows the selected branch, the node's downstream, or walks out of
//!    the enclosing branch once a branch chain ends.
//! 4. Stops on suspension (pending job) or termination (terminal status),
//!    deleting the execution if the workflow asks for it.
//!
//! Instruction failures never escape: the node gets an `error` job, the
//! execution keeps its status, and the failure is logged. Storage errors do
//! propagate.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use db::{
    Execution, ExecutionStatus, FlowNode, Job, JobStatus, NewJob, NodeId, Store, Workflow,
};
use instructions::{ExecutionContext, InstructionOutcome};

use crate::registry::InstructionRegistry;
use crate::EngineError;

/// Where the walk goes after a node.
enum Step {
    Next { node_id: NodeId, input: Option<Job> },
    Done,
}

pub struct Processor {
    store: Arc<dyn Store>,
    instructions: Arc<InstructionRegistry>,
    workflow: Workflow,
    execution: Execution,
    ctx: ExecutionContext,
    jobs: Vec<Job>,
}

impl Processor {
    /// Load the jobs already produced for `execution`.
    pub async fn new(
        store: Arc<dyn Store>,
        instructions: Arc<InstructionRegistry>,
        workflow: Workflow,
        execution: Execution,
    ) -> Result<Self, EngineError> {
        let jobs = store.list_jobs(execution.id).await?;
        let mut ctx = ExecutionContext::new(&execution);
        for job in &jobs {
            ctx.record(&job.node_key, job);
        }
        Ok(Self {
            store,
            instructions,
            workflow,
            execution,
            ctx,
            jobs,
        })
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Every job of the execution, oldest first.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn last_job(&self) -> Option<&Job> {
        self.jobs.iter().max_by_key(|j| (j.updated_at, j.id))
    }

    /// Run the flow from its root node.
    #[instrument(skip(self), fields(execution_id = self.execution.id, workflow_id = self.workflow.id))]
    pub async fn start(&mut self) -> Result<(), EngineError> {
        if !self.enter().await? {
            return Ok(());
        }
        let root = self.workflow.nodes.iter().find(|n| n.upstream_id.is_none());
        let step = match root {
            Some(node) => Step::Next {
                node_id: node.id,
                input: None,
            },
            None => {
                self.exit(ExecutionStatus::Resolved).await?;
                Step::Done
            }
        };
        self.drive(step).await
    }

    /// Re-enter the node of a pending `job` and continue after it.
    #[instrument(skip(self, job), fields(execution_id = self.execution.id, job_id = job.id))]
    pub async fn resume(&mut self, mut job: Job) -> Result<(), EngineError> {
        if !self.enter().await? {
            return Ok(());
        }
        let node = self.node(job.node_id)?;
        let outcome = match self.instructions.get(&node.instruction) {
            Ok(instruction) => instruction
                .resume(&node, &job, &self.ctx)
                .await
                .map_err(EngineError::from),
            Err(err) => Err(err),
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(node_id = node.id, error = %err, "instruction failed on resume");
                job.status = JobStatus::Error;
                job.result = json!({ "error": err.to_string() });
                let job = self.store.update_job(&job).await?;
                self.store_job(job, &node);
                return Ok(());
            }
        };

        job.status = outcome.job_status();
        job.result = outcome.result().clone();
        let job = self.store.update_job(&job).await?;
        self.store_job(job.clone(), &node);
        let step = self.after(&node, job, outcome).await?;
        self.drive(step).await
    }

    /// Prepare the execution for processing. Returns `false` if it is
    /// already finished.
    async fn enter(&mut self) -> Result<bool, EngineError> {
        match self.execution.status {
            ExecutionStatus::Queueing => {
                self.execution = self
                    .store
                    .update_execution_status(self.execution.id, ExecutionStatus::Started)
                    .await?;
                debug!("execution started");
                Ok(true)
            }
            ExecutionStatus::Started => Ok(true),
            status => {
                warn!(%status, "execution already finished, nothing to process");
                Ok(false)
            }
        }
    }

    async fn drive(&mut self, mut step: Step) -> Result<(), EngineError> {
        while let Step::Next { node_id, input } = step {
            let node = self.node(node_id)?;
            let outcome = match self.instructions.get(&node.instruction) {
                Ok(instruction) => instruction
                    .run(&node, input.as_ref(), &self.ctx)
                    .await
                    .map_err(EngineError::from),
                Err(err) => Err(err),
            };

            step = match outcome {
                Ok(outcome) => {
                    let new_job = self.new_job(
                        &node,
                        input.as_ref(),
                        outcome.job_status(),
                        outcome.result().clone(),
                    );
                    let job = self.store.insert_job(new_job).await?;
                    self.store_job(job.clone(), &node);
                    self.after(&node, job, outcome).await?
                }
                Err(err) => {
                    error!(node_id = node.id, node_key = %node.key, error = %err, "instruction failed");
                    let new_job = self.new_job(
                        &node,
                        input.as_ref(),
                        JobStatus::Error,
                        json!({ "error": err.to_string() }),
                    );
                    let job = self.store.insert_job(new_job).await?;
                    self.store_job(job, &node);
                    Step::Done
                }
            };
        }
        Ok(())
    }

    async fn after(
        &mut self,
        node: &FlowNode,
        job: Job,
        outcome: InstructionOutcome,
    ) -> Result<Step, EngineError> {
        match outcome {
            InstructionOutcome::Continue { branch, .. } => match self.successor(node, branch) {
                Some(node_id) => Ok(Step::Next {
                    node_id,
                    input: Some(job),
                }),
                None => {
                    self.exit(ExecutionStatus::Resolved).await?;
                    Ok(Step::Done)
                }
            },
            InstructionOutcome::Suspend { .. } => {
                info!(node_id = node.id, job_id = job.id, "execution suspended");
                Ok(Step::Done)
            }
            InstructionOutcome::Terminate { status, .. } => {
                match status.execution_status() {
                    Some(status) => self.exit(status).await?,
                    None => info!(node_id = node.id, job_id = job.id, "execution suspended"),
                }
                Ok(Step::Done)
            }
        }
    }

    /// Next node after `node`: the head of `branch` if there is one, else the
    /// downstream, else the downstream of whichever enclosing branch owner
    /// has one.
    fn successor(&self, node: &FlowNode, branch: Option<i64>) -> Option<NodeId> {
        if let Some(index) = branch {
            let head = self
                .workflow
                .nodes
                .iter()
                .find(|n| n.upstream_id == Some(node.id) && n.branch_index == Some(index));
            if let Some(head) = head {
                return Some(head.id);
            }
        }

        let mut current = node;
        loop {
            if let Some(down) = current.downstream_id {
                return Some(down);
            }
            current = self.branch_owner(current)?;
        }
    }

    /// The node whose branch contains `node`, if any.
    fn branch_owner(&self, node: &FlowNode) -> Option<&FlowNode> {
        let mut current = node;
        loop {
            let upstream = self.workflow.node(current.upstream_id?)?;
            if current.branch_index.is_some() {
                return Some(upstream);
            }
            current = upstream;
        }
    }

    async fn exit(&mut self, status: ExecutionStatus) -> Result<(), EngineError> {
        self.execution = self
            .store
            .update_execution_status(self.execution.id, status)
            .await?;
        info!(%status, "execution finished");

        if self.workflow.options.delete_execution_on_status.contains(&status) {
            self.store.delete_execution(self.execution.id).await?;
            debug!(%status, "execution deleted");
        }
        Ok(())
    }

    fn node(&self, node_id: NodeId) -> Result<FlowNode, EngineError> {
        self.workflow
            .node(node_id)
            .cloned()
            .ok_or(EngineError::NodeNotFound {
                workflow_id: self.workflow.id,
                node_id,
            })
    }

    fn new_job(
        &self,
        node: &FlowNode,
        input: Option<&Job>,
        status: JobStatus,
        result: serde_json::Value,
    ) -> NewJob {
        NewJob {
            execution_id: self.execution.id,
            node_id: node.id,
            node_key: node.key.clone(),
            upstream_id: input.map(|j| j.id),
            status,
            result,
        }
    }

    fn store_job(&mut self, job: Job, node: &FlowNode) {
        self.ctx.record(&node.key, &job);
        match self.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job,
            None => self.jobs.push(job),
        }
    }
}
