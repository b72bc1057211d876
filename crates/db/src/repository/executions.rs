//! Execution operations.

use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};

use super::map_conflict;
use crate::models::{Execution, ExecutionId, ExecutionStatus, NewExecution};
use crate::DbError;

const COLUMNS: &str = "id, workflow_id, key, event_key, context, status, created_at, updated_at";

pub(crate) fn execution_from_row(row: &PgRow) -> Result<Execution, DbError> {
    let status: String = row.try_get("status")?;
    Ok(Execution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        key: row.try_get("key")?,
        event_key: row.try_get("event_key")?,
        context: row.try_get("context")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new execution. A reused `event_key` yields `DbError::Conflict`.
pub async fn create_execution<'e, E: PgExecutor<'e>>(
    exec: E,
    execution: &NewExecution,
) -> Result<Execution, DbError> {
    let sql = format!(
        "INSERT INTO executions (workflow_id, key, event_key, context, status, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, now(), now()) \
         RETURNING {COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(execution.workflow_id)
        .bind(&execution.key)
        .bind(&execution.event_key)
        .bind(&execution.context)
        .bind(execution.status.as_str())
        .fetch_one(exec)
        .await
        .map_err(map_conflict)?;
    execution_from_row(&row)
}

pub async fn get_execution<'e, E: PgExecutor<'e>>(
    exec: E,
    id: ExecutionId,
) -> Result<Execution, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM executions WHERE id = $1");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?
        .ok_or(DbError::NotFound)?;
    execution_from_row(&row)
}

/// Oldest queueing execution belonging to an enabled workflow.
pub async fn next_queueing_execution<'e, E: PgExecutor<'e>>(
    exec: E,
) -> Result<Option<Execution>, DbError> {
    let sql = "SELECT e.id, e.workflow_id, e.key, e.event_key, e.context, e.status, \
                      e.created_at, e.updated_at \
               FROM executions e \
               JOIN workflows w ON w.id = e.workflow_id \
               WHERE e.status = 'queueing' AND w.enabled \
               ORDER BY e.id ASC \
               LIMIT 1";
    let row = sqlx::query(sql).fetch_optional(exec).await?;
    row.as_ref().map(execution_from_row).transpose()
}

/// Move an execution to `status` if its current status allows it.
///
/// Returns `Ok(None)` when the row exists in a status that may not move to
/// `status` (or does not exist); the caller decides which error that is.
pub async fn advance_execution_status<'e, E: PgExecutor<'e>>(
    exec: E,
    id: ExecutionId,
    status: ExecutionStatus,
) -> Result<Option<Execution>, DbError> {
    let predecessors: Vec<String> = ExecutionStatus::ALL
        .iter()
        .filter(|from| from.can_transition_to(status))
        .map(|from| from.as_str().to_string())
        .collect();
    let sql = format!(
        "UPDATE executions SET status = $2, updated_at = now() \
         WHERE id = $1 AND status = ANY($3) \
         RETURNING {COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(status.as_str())
        .bind(predecessors)
        .fetch_optional(exec)
        .await?;
    row.as_ref().map(execution_from_row).transpose()
}

/// Delete an execution (its jobs cascade).
pub async fn delete_execution<'e, E: PgExecutor<'e>>(exec: E, id: ExecutionId) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM executions WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
