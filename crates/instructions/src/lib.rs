//! `instructions` crate — the `Instruction` trait and built-in instructions.
//!
//! Every flow node type, built-in or embedder-provided, implements
//! [`Instruction`]. The engine resolves a node's `instruction` name through
//! its registry and dispatches through this trait object.

pub mod builtin;
pub mod context;
pub mod error;
pub mod mock;
pub mod traits;

pub use context::ExecutionContext;
pub use error::InstructionError;
pub use traits::{Instruction, InstructionOutcome};
