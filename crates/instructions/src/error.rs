//! Instruction-level error type.

use thiserror::Error;

/// Errors returned by an instruction's `run` or `resume`.
///
/// The processor never turns these into a terminal status on its own: the
/// failing node gets an `error` job and the execution stays where it was.
/// An instruction that wants the execution to fail returns
/// `InstructionOutcome::Terminate` instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InstructionError {
    /// The instruction ran and failed.
    #[error("instruction failed: {0}")]
    Failed(String),

    /// The node's `config` does not fit the instruction.
    #[error("invalid config on node {node_id}: {message}")]
    InvalidConfig { node_id: i64, message: String },

    /// `resume` was called on an instruction that never suspends.
    #[error("instruction '{0}' cannot be resumed")]
    NotResumable(String),
}
