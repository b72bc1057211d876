//! Cross-process sync messages.
//!
//! Engines sharing a database tell each other when a workflow's triggers
//! were attached or detached so every `enabledCache` converges without
//! re-reading storage. The transport is pluggable; `BroadcastSyncBus`
//! covers engines living in one process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use db::WorkflowId;

use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncMessage {
    #[serde(rename_all = "camelCase")]
    StatusChange { workflow_id: WorkflowId, enabled: bool },
}

/// A message plus the id of the engine that sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub origin: Uuid,
    #[serde(flatten)]
    pub message: SyncMessage,
}

#[async_trait]
pub trait SyncBus: Send + Sync {
    async fn publish(&self, envelope: SyncEnvelope) -> Result<(), EngineError>;

    /// A receiver for messages published from now on, or `None` if this bus
    /// never delivers anything.
    fn subscribe(&self) -> Option<broadcast::Receiver<SyncEnvelope>>;
}

/// Drops everything. Used when the engine runs alone.
pub struct NoopSyncBus;

#[async_trait]
impl SyncBus for NoopSyncBus {
    async fn publish(&self, _envelope: SyncEnvelope) -> Result<(), EngineError> {
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<SyncEnvelope>> {
        None
    }
}

/// In-process fan-out over `tokio::sync::broadcast`.
#[derive(Clone)]
pub struct BroadcastSyncBus {
    tx: broadcast::Sender<SyncEnvelope>,
}

impl BroadcastSyncBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for BroadcastSyncBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl SyncBus for BroadcastSyncBus {
    async fn publish(&self, envelope: SyncEnvelope) -> Result<(), EngineError> {
        // No subscribers is not an error; there is simply nobody to tell.
        let _ = self.tx.send(envelope);
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<SyncEnvelope>> {
        Some(self.tx.subscribe())
    }
}
