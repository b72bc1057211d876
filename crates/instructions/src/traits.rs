//! The `Instruction` trait — the contract every flow node type fulfils.

use async_trait::async_trait;
use serde_json::Value;

use db::{FlowNode, Job, JobStatus};

use crate::{ExecutionContext, InstructionError};

/// What a node asks the processor to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionOutcome {
    /// Record a resolved job and move on. `branch` selects the head of that
    /// branch under this node; `None` (or a missing branch) follows the
    /// node's downstream.
    Continue { result: Value, branch: Option<i64> },

    /// Record a pending job and stop until the job is resumed.
    Suspend { result: Value },

    /// Record a job with `status` and end the execution with the matching
    /// terminal status.
    Terminate { status: JobStatus, result: Value },
}

impl InstructionOutcome {
    pub fn resolved(result: Value) -> Self {
        Self::Continue { result, branch: None }
    }

    pub fn job_status(&self) -> JobStatus {
        match self {
            Self::Continue { .. } => JobStatus::Resolved,
            Self::Suspend { .. } => JobStatus::Pending,
            Self::Terminate { status, .. } => *status,
        }
    }

    pub fn result(&self) -> &Value {
        match self {
            Self::Continue { result, .. }
            | Self::Suspend { result }
            | Self::Terminate { result, .. } => result,
        }
    }
}

/// One node type of the flow graph.
///
/// Implementations are registered once per type name and shared by every
/// execution, so they must not keep per-execution state.
#[async_trait]
pub trait Instruction: Send + Sync {
    /// Run `node`. `input` is the job produced by the previous node, if any.
    async fn run(
        &self,
        node: &FlowNode,
        input: Option<&Job>,
        ctx: &ExecutionContext,
    ) -> Result<InstructionOutcome, InstructionError>;

    /// Re-enter a node whose job was left pending. `job` carries whatever
    /// status and result the resuming party wrote onto it.
    async fn resume(
        &self,
        node: &FlowNode,
        _job: &Job,
        _ctx: &ExecutionContext,
    ) -> Result<InstructionOutcome, InstructionError> {
        Err(InstructionError::NotResumable(node.instruction.clone()))
    }
}
