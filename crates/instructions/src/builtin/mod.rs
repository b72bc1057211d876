//! Instructions shipped with the engine.

pub mod condition;
pub mod echo;
pub mod end;
pub mod manual;

pub use condition::ConditionInstruction;
pub use echo::EchoInstruction;
pub use end::EndInstruction;
pub use manual::ManualInstruction;

use serde::de::DeserializeOwned;

use db::FlowNode;

use crate::InstructionError;

/// Deserialize a node's `config`, treating `null` as an empty object.
pub(crate) fn parse_config<T: DeserializeOwned>(node: &FlowNode) -> Result<T, InstructionError> {
    let raw = if node.config.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        node.config.clone()
    };
    serde_json::from_value(raw).map_err(|e| InstructionError::InvalidConfig {
        node_id: node.id,
        message: e.to_string(),
    })
}
