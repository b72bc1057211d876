//! Workflow version operations.

use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};

use super::{decode_json, encode_json, map_conflict};
use crate::models::{NewWorkflow, Workflow, WorkflowId};
use crate::DbError;

const COLUMNS: &str = "id, key, title, trigger_type, config, enabled, current, sync, options, \
                       nodes, executed, all_executed, created_at, updated_at";

pub(crate) fn workflow_from_row(row: &PgRow) -> Result<Workflow, DbError> {
    Ok(Workflow {
        id: row.try_get("id")?,
        key: row.try_get("key")?,
        title: row.try_get("title")?,
        trigger_type: row.try_get("trigger_type")?,
        config: row.try_get("config")?,
        enabled: row.try_get("enabled")?,
        current: row.try_get("current")?,
        sync: row.try_get("sync")?,
        options: decode_json("options", row.try_get("options")?)?,
        nodes: decode_json("nodes", row.try_get("nodes")?)?,
        executed: row.try_get("executed")?,
        all_executed: row.try_get("all_executed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new workflow version. Counters start at zero.
pub async fn create_workflow<'e, E: PgExecutor<'e>>(
    exec: E,
    workflow: &NewWorkflow,
) -> Result<Workflow, DbError> {
    let sql = format!(
        "INSERT INTO workflows \
             (key, title, trigger_type, config, enabled, current, sync, options, nodes, \
              executed, all_executed, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 0, now(), now()) \
         RETURNING {COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(&workflow.key)
        .bind(&workflow.title)
        .bind(&workflow.trigger_type)
        .bind(&workflow.config)
        .bind(workflow.enabled)
        .bind(workflow.current)
        .bind(workflow.sync)
        .bind(encode_json("options", &workflow.options)?)
        .bind(encode_json("nodes", &workflow.nodes)?)
        .fetch_one(exec)
        .await
        .map_err(map_conflict)?;
    workflow_from_row(&row)
}

/// Overwrite the definition of an existing version, keeping its counters.
pub async fn update_workflow<'e, E: PgExecutor<'e>>(
    exec: E,
    id: WorkflowId,
    workflow: &NewWorkflow,
) -> Result<Workflow, DbError> {
    let sql = format!(
        "UPDATE workflows \
         SET key = $2, title = $3, trigger_type = $4, config = $5, enabled = $6, \
             current = $7, sync = $8, options = $9, nodes = $10, updated_at = now() \
         WHERE id = $1 \
         RETURNING {COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(&workflow.key)
        .bind(&workflow.title)
        .bind(&workflow.trigger_type)
        .bind(&workflow.config)
        .bind(workflow.enabled)
        .bind(workflow.current)
        .bind(workflow.sync)
        .bind(encode_json("options", &workflow.options)?)
        .bind(encode_json("nodes", &workflow.nodes)?)
        .fetch_optional(exec)
        .await
        .map_err(map_conflict)?
        .ok_or(DbError::NotFound)?;
    workflow_from_row(&row)
}

/// Fetch a single workflow version by its primary key.
pub async fn get_workflow<'e, E: PgExecutor<'e>>(exec: E, id: WorkflowId) -> Result<Workflow, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM workflows WHERE id = $1");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?
        .ok_or(DbError::NotFound)?;
    workflow_from_row(&row)
}

/// Every enabled version, oldest first.
pub async fn list_enabled_workflows<'e, E: PgExecutor<'e>>(exec: E) -> Result<Vec<Workflow>, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM workflows WHERE enabled ORDER BY id");
    let rows = sqlx::query(&sql).fetch_all(exec).await?;
    rows.iter().map(workflow_from_row).collect()
}

/// Permanently delete a workflow version (executions and jobs cascade).
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow<'e, E: PgExecutor<'e>>(exec: E, id: WorkflowId) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// Demote the current version(s) of `key` except `except`, returning the
/// rows as they were before.
pub async fn demote_current<'e, E: PgExecutor<'e>>(
    exec: E,
    key: &str,
    except: Option<WorkflowId>,
) -> Result<Vec<Workflow>, DbError> {
    let old_columns = COLUMNS
        .split(", ")
        .map(|c| format!("old.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE workflows w \
         SET enabled = FALSE, current = NULL, updated_at = now() \
         FROM (SELECT {COLUMNS} FROM workflows \
               WHERE key = $1 AND current AND ($2::BIGINT IS NULL OR id <> $2) \
               FOR UPDATE) old \
         WHERE w.id = old.id \
         RETURNING {old_columns}"
    );
    let rows = sqlx::query(&sql).bind(key).bind(except).fetch_all(exec).await?;
    rows.iter().map(workflow_from_row).collect()
}

/// Increment `executed` and return the reloaded row.
pub async fn increment_executed<'e, E: PgExecutor<'e>>(
    exec: E,
    id: WorkflowId,
) -> Result<Workflow, DbError> {
    let sql = format!(
        "UPDATE workflows SET executed = executed + 1, updated_at = now() \
         WHERE id = $1 RETURNING {COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?
        .ok_or(DbError::NotFound)?;
    workflow_from_row(&row)
}

/// Persist the aggregate `all_executed` on every version sharing `key`.
pub async fn sync_all_executed<'e, E: PgExecutor<'e>>(exec: E, key: &str) -> Result<i64, DbError> {
    let total: Option<i64> = sqlx::query_scalar(
        "UPDATE workflows \
         SET all_executed = (SELECT COALESCE(SUM(executed), 0)::BIGINT FROM workflows WHERE key = $1) \
         WHERE key = $1 \
         RETURNING all_executed",
    )
    .bind(key)
    .fetch_optional(exec)
    .await?;
    Ok(total.unwrap_or(0))
}
