//! Engine tuning knobs.

use std::time::Duration;

/// Runtime settings for an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the worker polls storage for queueing executions even when
    /// nothing woke it up.
    pub checker_interval: Duration,
    /// Publish and consume `statusChange` messages on the sync bus.
    pub sync_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checker_interval: Duration::from_secs(5 * 60),
            sync_enabled: true,
        }
    }
}
