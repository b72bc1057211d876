//! `end` — stop the execution with a configured status.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use db::{FlowNode, Job, JobStatus};

use super::parse_config;
use crate::{ExecutionContext, Instruction, InstructionError, InstructionOutcome};

#[derive(Debug, Deserialize)]
struct EndConfig {
    #[serde(default = "default_status")]
    end_status: JobStatus,
}

fn default_status() -> JobStatus {
    JobStatus::Resolved
}

pub struct EndInstruction;

#[async_trait]
impl Instruction for EndInstruction {
    async fn run(
        &self,
        node: &FlowNode,
        _input: Option<&Job>,
        _ctx: &ExecutionContext,
    ) -> Result<InstructionOutcome, InstructionError> {
        let config: EndConfig = parse_config(node)?;
        if config.end_status == JobStatus::Pending {
            return Err(InstructionError::InvalidConfig {
                node_id: node.id,
                message: "end_status cannot be pending".into(),
            });
        }
        Ok(InstructionOutcome::Terminate {
            status: config.end_status,
            result: Value::Null,
        })
    }
}
