//! `manual` — wait for someone outside the engine to decide.
//!
//! The node suspends with its resolved `config.form` as the pending job
//! result. The deciding party writes a status and result onto the job and
//! hands it back through `Engine::resume`.

use async_trait::async_trait;
use serde_json::Value;

use db::{FlowNode, Job, JobStatus};

use crate::{ExecutionContext, Instruction, InstructionError, InstructionOutcome};

pub struct ManualInstruction;

#[async_trait]
impl Instruction for ManualInstruction {
    async fn run(
        &self,
        node: &FlowNode,
        _input: Option<&Job>,
        ctx: &ExecutionContext,
    ) -> Result<InstructionOutcome, InstructionError> {
        let form = node.config.get("form").cloned().unwrap_or(Value::Null);
        Ok(InstructionOutcome::Suspend {
            result: ctx.resolve(&form),
        })
    }

    async fn resume(
        &self,
        _node: &FlowNode,
        job: &Job,
        _ctx: &ExecutionContext,
    ) -> Result<InstructionOutcome, InstructionError> {
        let result = job.result.clone();
        Ok(match job.status {
            JobStatus::Pending => InstructionOutcome::Suspend { result },
            JobStatus::Resolved => InstructionOutcome::resolved(result),
            status => InstructionOutcome::Terminate { status, result },
        })
    }
}
