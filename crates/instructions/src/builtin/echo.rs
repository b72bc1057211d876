//! `echo` — resolve `config.value` against the execution scope and pass it on.

use async_trait::async_trait;
use serde_json::Value;

use db::{FlowNode, Job};

use crate::{ExecutionContext, Instruction, InstructionError, InstructionOutcome};

pub struct EchoInstruction;

#[async_trait]
impl Instruction for EchoInstruction {
    async fn run(
        &self,
        node: &FlowNode,
        _input: Option<&Job>,
        ctx: &ExecutionContext,
    ) -> Result<InstructionOutcome, InstructionError> {
        let value = node.config.get("value").cloned().unwrap_or(Value::Null);
        Ok(InstructionOutcome::resolved(ctx.resolve(&value)))
    }
}
