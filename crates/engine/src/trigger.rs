//! The `Trigger` trait — decides when and whether a workflow runs.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use db::Workflow;

use crate::{Engine, EngineError, Processor};

/// Per-event options passed to `Engine::trigger`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerOptions {
    /// Run now in the caller's context, even if the workflow is disabled.
    pub manually: bool,
    /// Create the execution already `started`; it runs once handed to
    /// `Engine::start_execution`.
    pub deferred: bool,
    /// Idempotency token. A fresh uuid is used when absent.
    pub event_key: Option<String>,
}

/// Non-owning reference to the engine handed to triggers, so listeners
/// don't keep the engine alive.
#[derive(Clone)]
pub struct EngineHandle(Weak<Engine>);

impl EngineHandle {
    pub fn new(engine: &Arc<Engine>) -> Self {
        Self(Arc::downgrade(engine))
    }

    pub fn upgrade(&self) -> Option<Arc<Engine>> {
        self.0.upgrade()
    }
}

/// One trigger type, shared by every workflow of that type.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Attach a listener for `workflow` using its current config.
    async fn on(&self, workflow: &Workflow, engine: EngineHandle) -> Result<(), EngineError>;

    /// Detach the listener attached for `workflow`.
    async fn off(&self, workflow: &Workflow) -> Result<(), EngineError>;

    /// Whether a fired event should become an execution.
    async fn validate_event(
        &self,
        _workflow: &Workflow,
        _context: &Value,
        _options: &TriggerOptions,
    ) -> Result<bool, EngineError> {
        Ok(true)
    }

    /// Events of this type always run in the caller's context.
    fn sync(&self) -> bool {
        false
    }

    /// Run `workflow` right away for `context`.
    async fn execute(
        &self,
        engine: &Arc<Engine>,
        workflow: &Workflow,
        context: Value,
        options: TriggerOptions,
    ) -> Result<Option<Processor>, EngineError> {
        let options = TriggerOptions {
            manually: true,
            ..options
        };
        Ok(engine.trigger(workflow, Some(context), options).await)
    }
}
