//! Engine-level error types.

use thiserror::Error;

use db::{NodeId, WorkflowId};

/// Errors produced by the workflow engine (validation, registration and
/// execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Flow validation errors ------

    /// Two or more nodes share the same id.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(NodeId),

    /// Two or more nodes share the same key.
    #[error("duplicate node key: '{0}'")]
    DuplicateNodeKey(String),

    /// A link references a node id that doesn't exist in the flow.
    #[error("node {node_id} references unknown node {target} ({side})")]
    UnknownNodeReference {
        node_id: NodeId,
        target: NodeId,
        side: &'static str,
    },

    /// `a.downstream_id == b` but `b.upstream_id != a`.
    #[error("node {from} links downstream to node {to}, which does not link back")]
    BrokenLink { from: NodeId, to: NodeId },

    /// A branch head must hang off an upstream node.
    #[error("node {0} has a branch index but no upstream node")]
    BranchWithoutUpstream(NodeId),

    /// Flows need exactly one node without an upstream.
    #[error("flow must have exactly one root node, found {0}")]
    InvalidRoot(usize),

    /// The node graph is not acyclic.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    // ------ Registration errors ------

    #[error("invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("instruction type '{0}' is already registered")]
    DuplicateInstruction(String),

    #[error("trigger type '{0}' is already registered")]
    DuplicateTrigger(String),

    #[error("no instruction registered for type '{0}'")]
    UnknownInstruction(String),

    #[error("no trigger registered for type '{0}'")]
    UnknownTrigger(String),

    #[error("invalid trigger config on workflow {workflow_id}: {message}")]
    InvalidTriggerConfig {
        workflow_id: WorkflowId,
        message: String,
    },

    // ------ Execution errors ------

    /// An execution points at a node its workflow doesn't have.
    #[error("workflow {workflow_id} has no node {node_id}")]
    NodeNotFound {
        workflow_id: WorkflowId,
        node_id: NodeId,
    },

    #[error("instruction error: {0}")]
    Instruction(#[from] instructions::InstructionError),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
