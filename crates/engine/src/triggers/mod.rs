//! Triggers shipped with the engine.

pub mod manual;
pub mod schedule;

pub use manual::ManualTrigger;
pub use schedule::ScheduleTrigger;
