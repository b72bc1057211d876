//! Repository functions — one function per database operation.
//!
//! Every function takes any Postgres executor (`&PgPool` or the connection
//! of an open transaction) and returns a `Result<T, DbError>`.
//! No engine logic — pure SQL plus row decoding.

pub mod executions;
pub mod jobs;
pub mod workflows;

use crate::DbError;

/// Map unique-constraint violations onto [`DbError::Conflict`].
pub(crate) fn map_conflict(err: sqlx::Error) -> DbError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            DbError::Conflict(db_err.message().to_string())
        }
        _ => DbError::Sqlx(err),
    }
}

pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: serde_json::Value,
) -> Result<T, DbError> {
    serde_json::from_value(value).map_err(|e| DbError::Decode(format!("invalid {column} JSON: {e}")))
}

pub(crate) fn encode_json<T: serde::Serialize>(
    column: &str,
    value: &T,
) -> Result<serde_json::Value, DbError> {
    serde_json::to_value(value).map_err(|e| DbError::Decode(format!("cannot encode {column}: {e}")))
}
