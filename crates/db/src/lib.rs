//! `db` crate — pure persistence layer.
//!
//! Provides the data model, the [`Store`]/[`StoreTx`] ports the engine talks
//! to, and two implementations: [`MemoryStore`] and the Postgres-backed
//! [`PgStore`]. No engine logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use models::{
    Execution, ExecutionId, ExecutionStatus, FlowNode, Job, JobId, JobStatus, NewExecution,
    NewJob, NewWorkflow, NodeId, Workflow, WorkflowId, WorkflowOptions,
};
pub use pool::{DbPool, PoolSettings};
pub use postgres::PgStore;
pub use store::{Store, StoreTx};
