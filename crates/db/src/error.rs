//! Typed error type for the db crate.

use thiserror::Error;

use crate::models::ExecutionStatus;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A unique constraint was violated (e.g. a reused `event_key`).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Execution status may only move forward.
    #[error("invalid execution status transition {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("decode error: {0}")]
    Decode(String),
}
