//! `engine` crate — flow validation, registries, triggers, the execution
//! processor and the dispatcher.

pub mod config;
pub mod dag;
pub mod dispatcher;
pub mod error;
pub mod processor;
pub mod registry;
pub mod sync;
pub mod trigger;
pub mod triggers;

pub use config::EngineConfig;
pub use dag::validate_flow;
pub use dispatcher::{Engine, EngineBuilder};
pub use error::EngineError;
pub use processor::Processor;
pub use registry::{InstructionRegistry, TriggerRegistry};
pub use sync::{BroadcastSyncBus, NoopSyncBus, SyncBus, SyncEnvelope, SyncMessage};
pub use trigger::{EngineHandle, Trigger, TriggerOptions};

#[cfg(test)]
mod processor_tests;
#[cfg(test)]
mod test_support;
