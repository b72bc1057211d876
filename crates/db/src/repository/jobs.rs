//! Job operations.
//!
//! Jobs are appended as the processor advances and only updated when a
//! suspended job is resumed.

use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};

use crate::models::{ExecutionId, Job, JobId, NewJob};
use crate::DbError;

const COLUMNS: &str =
    "id, execution_id, node_id, node_key, upstream_id, status, result, created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<Job, DbError> {
    let status: String = row.try_get("status")?;
    Ok(Job {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        node_id: row.try_get("node_id")?,
        node_key: row.try_get("node_key")?,
        upstream_id: row.try_get("upstream_id")?,
        status: status.parse()?,
        result: row.try_get("result")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn insert_job<'e, E: PgExecutor<'e>>(exec: E, job: &NewJob) -> Result<Job, DbError> {
    let sql = format!(
        "INSERT INTO jobs (execution_id, node_id, node_key, upstream_id, status, result, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, now(), now()) \
         RETURNING {COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(job.execution_id)
        .bind(job.node_id)
        .bind(&job.node_key)
        .bind(job.upstream_id)
        .bind(job.status.as_str())
        .bind(&job.result)
        .fetch_one(exec)
        .await?;
    job_from_row(&row)
}

/// Persist a job's `status` and `result`.
pub async fn update_job<'e, E: PgExecutor<'e>>(exec: E, job: &Job) -> Result<Job, DbError> {
    let sql = format!(
        "UPDATE jobs SET status = $2, result = $3, updated_at = now() \
         WHERE id = $1 RETURNING {COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.result)
        .fetch_optional(exec)
        .await?
        .ok_or(DbError::NotFound)?;
    job_from_row(&row)
}

pub async fn get_job<'e, E: PgExecutor<'e>>(exec: E, id: JobId) -> Result<Job, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?
        .ok_or(DbError::NotFound)?;
    job_from_row(&row)
}

pub async fn list_jobs<'e, E: PgExecutor<'e>>(
    exec: E,
    execution_id: ExecutionId,
) -> Result<Vec<Job>, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM jobs WHERE execution_id = $1 ORDER BY id");
    let rows = sqlx::query(&sql).bind(execution_id).fetch_all(exec).await?;
    rows.iter().map(job_from_row).collect()
}
