//! `MockInstruction` — a test double for `Instruction`.
//!
//! Useful in unit and integration tests where a real instruction is either
//! unavailable or irrelevant. Every call is recorded, and the number of
//! concurrently running calls is tracked so tests can assert on the
//! engine's serialization.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use db::{FlowNode, Job, JobStatus, NodeId};

use crate::{ExecutionContext, Instruction, InstructionError, InstructionOutcome};

/// Behaviour injected into `MockInstruction` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Continue with a specific JSON value.
    Return(Value),
    /// Fail with `InstructionError::Failed`.
    Fail(String),
    /// Suspend on run; on resume continue with the job's result.
    Suspend,
    /// Sleep, then continue with `null`.
    Sleep(Duration),
    /// End the execution with the given job status.
    Terminate(JobStatus),
}

/// A mock instruction that records every node it runs.
#[derive(Clone)]
pub struct MockInstruction {
    pub behaviour: MockBehaviour,
    /// Node ids seen by `run`, in call order.
    pub calls: Arc<Mutex<Vec<NodeId>>>,
    /// Node ids seen by `resume`, in call order.
    pub resumes: Arc<Mutex<Vec<NodeId>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl MockInstruction {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            resumes: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock that always continues with the given value.
    pub fn returning(value: Value) -> Self {
        Self::new(MockBehaviour::Return(value))
    }

    /// Create a mock that always fails.
    pub fn failing(msg: impl Into<String>) -> Self {
        Self::new(MockBehaviour::Fail(msg.into()))
    }

    pub fn suspending() -> Self {
        Self::new(MockBehaviour::Suspend)
    }

    pub fn sleeping(duration: Duration) -> Self {
        Self::new(MockBehaviour::Sleep(duration))
    }

    pub fn terminating(status: JobStatus) -> Self {
        Self::new(MockBehaviour::Terminate(status))
    }

    /// Number of times `run` has been called.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn resume_count(&self) -> usize {
        self.resumes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Highest number of `run` calls ever in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Instruction for MockInstruction {
    async fn run(
        &self,
        node: &FlowNode,
        _input: Option<&Job>,
        _ctx: &ExecutionContext,
    ) -> Result<InstructionOutcome, InstructionError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(node.id);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        match &self.behaviour {
            MockBehaviour::Return(v) => Ok(InstructionOutcome::resolved(v.clone())),
            MockBehaviour::Fail(msg) => Err(InstructionError::Failed(msg.clone())),
            MockBehaviour::Suspend => Ok(InstructionOutcome::Suspend {
                result: json!({ "node": node.key }),
            }),
            MockBehaviour::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(InstructionOutcome::resolved(Value::Null))
            }
            MockBehaviour::Terminate(status) => Ok(InstructionOutcome::Terminate {
                status: *status,
                result: Value::Null,
            }),
        }
    }

    async fn resume(
        &self,
        node: &FlowNode,
        job: &Job,
        _ctx: &ExecutionContext,
    ) -> Result<InstructionOutcome, InstructionError> {
        self.resumes.lock().unwrap_or_else(PoisonError::into_inner).push(node.id);
        Ok(InstructionOutcome::resolved(job.result.clone()))
    }
}
