//! `schedule` — fire a workflow on a fixed interval.
//!
//! Config:
//! ```json
//! { "repeat_ms": 60000, "limit": 10 }
//! ```
//! Each enabled workflow gets its own timer task. `limit` caps the number of
//! executions across every version of the workflow.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use db::{Workflow, WorkflowId};

use crate::trigger::{EngineHandle, Trigger, TriggerOptions};
use crate::EngineError;

#[derive(Debug, Deserialize)]
struct ScheduleConfig {
    repeat_ms: u64,
    #[serde(default)]
    limit: Option<i64>,
}

impl ScheduleConfig {
    fn parse(workflow: &Workflow) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_value(workflow.config.clone()).map_err(|e| {
            EngineError::InvalidTriggerConfig {
                workflow_id: workflow.id,
                message: e.to_string(),
            }
        })?;
        if config.repeat_ms == 0 {
            return Err(EngineError::InvalidTriggerConfig {
                workflow_id: workflow.id,
                message: "repeat_ms must be positive".into(),
            });
        }
        Ok(config)
    }
}

#[derive(Default)]
pub struct ScheduleTrigger {
    timers: Mutex<HashMap<WorkflowId, JoinHandle<()>>>,
}

impl ScheduleTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of workflows with a running timer.
    pub async fn active(&self) -> usize {
        self.timers.lock().await.len()
    }
}

#[async_trait]
impl Trigger for ScheduleTrigger {
    async fn on(&self, workflow: &Workflow, engine: EngineHandle) -> Result<(), EngineError> {
        let config = ScheduleConfig::parse(workflow)?;
        let workflow_id = workflow.id;
        let period = Duration::from_millis(config.repeat_ms);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else { break };
                let Some(current) = engine.enabled_workflow(workflow_id).await else {
                    debug!(workflow_id, "schedule fired for a detached workflow");
                    break;
                };
                engine
                    .trigger(&current, Some(json!({ "date": Utc::now() })), TriggerOptions::default())
                    .await;
            }
        });

        if let Some(previous) = self.timers.lock().await.insert(workflow_id, handle) {
            previous.abort();
        }
        info!(workflow_id, repeat_ms = config.repeat_ms, "schedule attached");
        Ok(())
    }

    async fn off(&self, workflow: &Workflow) -> Result<(), EngineError> {
        if let Some(handle) = self.timers.lock().await.remove(&workflow.id) {
            handle.abort();
            info!(workflow_id = workflow.id, "schedule detached");
        }
        Ok(())
    }

    async fn validate_event(
        &self,
        workflow: &Workflow,
        _context: &Value,
        _options: &TriggerOptions,
    ) -> Result<bool, EngineError> {
        let config = ScheduleConfig::parse(workflow)?;
        Ok(match config.limit {
            Some(limit) => workflow.all_executed < limit,
            None => true,
        })
    }
}
