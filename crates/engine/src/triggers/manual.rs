//! `manual` — no listener; runs only through `Engine::execute`.

use async_trait::async_trait;

use db::Workflow;

use crate::trigger::{EngineHandle, Trigger};
use crate::EngineError;

pub struct ManualTrigger;

#[async_trait]
impl Trigger for ManualTrigger {
    async fn on(&self, _workflow: &Workflow, _engine: EngineHandle) -> Result<(), EngineError> {
        Ok(())
    }

    async fn off(&self, _workflow: &Workflow) -> Result<(), EngineError> {
        Ok(())
    }
}
