//! Persisted data model: workflows, executions and jobs.
//!
//! These types carry no engine behaviour beyond their own status rules.
//! The Postgres store maps them onto the `workflows`, `executions` and
//! `jobs` tables; the memory store keeps them as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DbError;

pub type WorkflowId = i64;
pub type ExecutionId = i64;
pub type JobId = i64;
pub type NodeId = i64;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle of an execution.
///
/// Moves forward only: `Queueing -> Started -> <terminal>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queueing,
    Started,
    Resolved,
    Failed,
    Error,
    Aborted,
    Canceled,
    Rejected,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 8] = [
        Self::Queueing,
        Self::Started,
        Self::Resolved,
        Self::Failed,
        Self::Error,
        Self::Aborted,
        Self::Canceled,
        Self::Rejected,
    ];

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queueing | Self::Started)
    }

    /// Whether an execution in `self` may move to `next`.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        match (self, next) {
            (Self::Queueing, Self::Queueing) => false,
            (Self::Queueing, _) => true,
            (Self::Started, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queueing => "queueing",
            Self::Started => "started",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Aborted => "aborted",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = DbError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queueing" => Ok(Self::Queueing),
            "started"  => Ok(Self::Started),
            "resolved" => Ok(Self::Resolved),
            "failed"   => Ok(Self::Failed),
            "error"    => Ok(Self::Error),
            "aborted"  => Ok(Self::Aborted),
            "canceled" => Ok(Self::Canceled),
            "rejected" => Ok(Self::Rejected),
            other      => Err(DbError::Decode(format!("unknown execution status: {other}"))),
        }
    }
}

/// Outcome of one instruction within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Suspended, waiting for an external resume.
    Pending,
    Resolved,
    Failed,
    Error,
    Aborted,
    Canceled,
    Rejected,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Aborted => "aborted",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
        }
    }

    /// Terminal execution status reached when a job with this status ends
    /// the flow. `None` for `Pending`.
    pub fn execution_status(self) -> Option<ExecutionStatus> {
        match self {
            Self::Pending => None,
            Self::Resolved => Some(ExecutionStatus::Resolved),
            Self::Failed => Some(ExecutionStatus::Failed),
            Self::Error => Some(ExecutionStatus::Error),
            Self::Aborted => Some(ExecutionStatus::Aborted),
            Self::Canceled => Some(ExecutionStatus::Canceled),
            Self::Rejected => Some(ExecutionStatus::Rejected),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DbError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"  => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "failed"   => Ok(Self::Failed),
            "error"    => Ok(Self::Error),
            "aborted"  => Ok(Self::Aborted),
            "canceled" => Ok(Self::Canceled),
            "rejected" => Ok(Self::Rejected),
            other      => Err(DbError::Decode(format!("unknown job status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Flow nodes
// ---------------------------------------------------------------------------

/// One node of a workflow's instruction graph.
///
/// A node whose `upstream_id` is set and whose `branch_index` is `Some` is the
/// head of that branch of its upstream node. Plain successors are linked
/// through `downstream_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: NodeId,
    pub key: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Registered instruction type, e.g. `condition`.
    pub instruction: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub upstream_id: Option<NodeId>,
    #[serde(default)]
    pub downstream_id: Option<NodeId>,
    #[serde(default)]
    pub branch_index: Option<i64>,
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOptions {
    /// Terminal statuses whose executions are deleted once reached.
    #[serde(default)]
    pub delete_execution_on_status: Vec<ExecutionStatus>,
}

/// One version of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    /// Stable identity shared by every version.
    pub key: String,
    pub title: String,
    /// Registered trigger type, e.g. `schedule`.
    pub trigger_type: String,
    pub config: serde_json::Value,
    pub enabled: bool,
    /// At most one version per `key` is current.
    pub current: Option<bool>,
    pub sync: bool,
    pub options: WorkflowOptions,
    pub nodes: Vec<FlowNode>,
    pub executed: i64,
    pub all_executed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn is_current(&self) -> bool {
        self.current == Some(true)
    }

    pub fn node(&self, id: NodeId) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Insert/update payload for a workflow version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkflow {
    /// `None` inserts a new version, `Some` updates that one in place.
    #[serde(default)]
    pub id: Option<WorkflowId>,
    pub key: String,
    #[serde(default)]
    pub title: String,
    pub trigger_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub current: Option<bool>,
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub options: WorkflowOptions,
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
}

impl NewWorkflow {
    /// Convenience constructor for a current, enabled version.
    pub fn new(key: impl Into<String>, trigger_type: impl Into<String>, nodes: Vec<FlowNode>) -> Self {
        Self {
            id: None,
            key: key.into(),
            title: String::new(),
            trigger_type: trigger_type.into(),
            config: serde_json::Value::Null,
            enabled: true,
            current: Some(true),
            sync: false,
            options: WorkflowOptions::default(),
            nodes,
        }
    }
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

/// One run of a workflow version against one triggering context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    /// Copy of the workflow key at creation.
    pub key: String,
    /// Idempotency token, unique across executions.
    pub event_key: String,
    /// Immutable snapshot of the triggering data.
    pub context: serde_json::Value,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub workflow_id: WorkflowId,
    pub key: String,
    pub event_key: String,
    pub context: serde_json::Value,
    pub status: ExecutionStatus,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// The persisted outcome of one instruction within one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub node_key: String,
    /// Job produced by the previous node, if any.
    pub upstream_id: Option<JobId>,
    pub status: JobStatus,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub node_key: String,
    pub upstream_id: Option<JobId>,
    pub status: JobStatus,
    pub result: serde_json::Value,
}
