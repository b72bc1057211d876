//! `condition` — compare two operands and pick a branch.
//!
//! Config:
//! ```json
//! { "operator": "gt", "left": "{{$context.data.amount}}", "right": 100, "reject_on_false": false }
//! ```
//! With `reject_on_false` a false result ends the execution as `failed`;
//! otherwise the node continues into branch `1` (true) or `0` (false).

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use db::{FlowNode, Job, JobStatus};

use super::parse_config;
use crate::{ExecutionContext, Instruction, InstructionError, InstructionOutcome};

pub const BRANCH_TRUE: i64 = 1;
pub const BRANCH_FALSE: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    #[default]
    Truthy,
}

#[derive(Debug, Deserialize)]
struct ConditionConfig {
    #[serde(default)]
    operator: Operator,
    #[serde(default)]
    left: Value,
    #[serde(default)]
    right: Value,
    #[serde(default)]
    reject_on_false: bool,
}

pub struct ConditionInstruction;

#[async_trait]
impl Instruction for ConditionInstruction {
    async fn run(
        &self,
        node: &FlowNode,
        _input: Option<&Job>,
        ctx: &ExecutionContext,
    ) -> Result<InstructionOutcome, InstructionError> {
        let config: ConditionConfig = parse_config(node)?;
        let left = ctx.resolve(&config.left);
        let right = ctx.resolve(&config.right);
        let passed = evaluate(config.operator, &left, &right);
        debug!(node_id = node.id, operator = ?config.operator, passed, "condition evaluated");

        if config.reject_on_false {
            if passed {
                return Ok(InstructionOutcome::resolved(Value::Bool(true)));
            }
            return Ok(InstructionOutcome::Terminate {
                status: JobStatus::Failed,
                result: Value::Bool(false),
            });
        }

        Ok(InstructionOutcome::Continue {
            result: Value::Bool(passed),
            branch: Some(if passed { BRANCH_TRUE } else { BRANCH_FALSE }),
        })
    }
}

pub fn evaluate(operator: Operator, left: &Value, right: &Value) -> bool {
    match operator {
        Operator::Eq => left == right,
        Operator::Ne => left != right,
        Operator::Gt => compare(left, right) == Some(Ordering::Greater),
        Operator::Gte => matches!(compare(left, right), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => compare(left, right) == Some(Ordering::Less),
        Operator::Lte => matches!(compare(left, right), Some(Ordering::Less | Ordering::Equal)),
        Operator::Truthy => truthy(left),
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
