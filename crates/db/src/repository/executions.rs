//! Execution operations.
//!
//! Status changes are compare-and-swap updates guarded by the expected
//! current status; log appends are a single jsonb concatenation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    DbError,
    models::{ExecutionAggregate, ExecutionRow, ExecutionStatus, JsonMap, LogEntry, Termination},
};

const EXECUTION_COLUMNS: &str = "id, loop_id, status, input_data, output_data, error_message, \
     execution_time_ms, started_at, completed_at, triggered_by, execution_log, created_at";

fn execution_from_row(row: &PgRow) -> Result<ExecutionRow, DbError> {
    let status: String = row.try_get("status")?;
    let input: Json<JsonMap> = row.try_get("input_data")?;
    let output: Option<Json<JsonMap>> = row.try_get("output_data")?;
    let log: Json<Vec<LogEntry>> = row.try_get("execution_log")?;

    Ok(ExecutionRow {
        id: row.try_get("id")?,
        workflow_id: row.try_get("loop_id")?,
        status: status.parse::<ExecutionStatus>().map_err(DbError::Corrupt)?,
        input: input.0,
        output: output.map(|o| o.0),
        error_message: row.try_get("error_message")?,
        execution_time_ms: row.try_get("execution_time_ms")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        triggered_by: row.try_get("triggered_by")?,
        log: log.0,
        created_at: row.try_get("created_at")?,
    })
}

/// Insert a `pending` execution for a live workflow.
pub async fn create_execution(
    pool: &PgPool,
    workflow_id: Uuid,
    input: &JsonMap,
    triggered_by: &str,
) -> Result<ExecutionRow, DbError> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO loop_executions (id, loop_id, status, input_data, triggered_by, execution_log, created_at)
        SELECT $1, l.id, 'pending', $3, $4, '[]'::jsonb, $5
        FROM loops l
        WHERE l.id = $2 AND l.deleted_at IS NULL
        RETURNING {EXECUTION_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(workflow_id)
    .bind(Json(input))
    .bind(triggered_by)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    execution_from_row(&row)
}

pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<ExecutionRow, DbError> {
    let row = sqlx::query(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM loop_executions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    execution_from_row(&row)
}

/// `pending → running`. Returns `false` when the execution was in any other
/// state.
pub async fn mark_running(pool: &PgPool, id: Uuid, started_at: DateTime<Utc>) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE loop_executions SET status = 'running', started_at = $1 WHERE id = $2 AND status = 'pending'",
    )
    .bind(started_at)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(true);
    }
    get_execution(pool, id).await?;
    Ok(false)
}

/// Append one entry to `execution_log` without reading it first.
pub async fn append_log(pool: &PgPool, id: Uuid, entry: &LogEntry) -> Result<(), DbError> {
    // Wrap in an array so `||` appends an element instead of merging objects.
    let element = serde_json::to_value(entry).map_err(|e| DbError::Corrupt(e.to_string()))?;
    let element = Value::Array(vec![element]);

    let result = sqlx::query(
        r#"
        UPDATE loop_executions
        SET execution_log = COALESCE(execution_log, '[]'::jsonb) || $1::jsonb
        WHERE id = $2
        "#,
    )
    .bind(Json(element))
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// `running → termination.status`, computing `execution_time_ms` from the
/// stored `started_at`. Returns `false` if another writer got there first.
pub async fn finish_execution(pool: &PgPool, id: Uuid, termination: &Termination) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE loop_executions
        SET status            = $1,
            output_data       = COALESCE($2, output_data),
            error_message     = $3,
            completed_at      = $4,
            execution_time_ms = GREATEST(
                (EXTRACT(EPOCH FROM ($4 - COALESCE(started_at, $4))) * 1000)::BIGINT, 0)
        WHERE id = $5 AND status = 'running'
        "#,
    )
    .bind(termination.status.to_string())
    .bind(termination.output.as_ref().map(Json))
    .bind(&termination.error_message)
    .bind(termination.completed_at)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(true);
    }
    get_execution(pool, id).await?;
    Ok(false)
}

/// Executions of a workflow, newest first.
pub async fn list_executions(pool: &PgPool, workflow_id: Uuid) -> Result<Vec<ExecutionRow>, DbError> {
    let rows = sqlx::query(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM loop_executions WHERE loop_id = $1 ORDER BY created_at DESC, id DESC"
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(execution_from_row).collect()
}

/// Counts and average duration in one pass, plus the newest execution.
pub async fn execution_aggregate(pool: &PgPool, workflow_id: Uuid) -> Result<ExecutionAggregate, DbError> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*)                                        AS total,
            COUNT(*) FILTER (WHERE status = 'completed')    AS completed,
            COUNT(*) FILTER (WHERE status = 'failed')       AS failed,
            AVG(execution_time_ms) FILTER (WHERE status = 'completed')::FLOAT8 AS average_ms
        FROM loop_executions
        WHERE loop_id = $1
        "#,
    )
    .bind(workflow_id)
    .fetch_one(pool)
    .await?;

    let last = sqlx::query(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM loop_executions WHERE loop_id = $1 \
         ORDER BY created_at DESC, id DESC LIMIT 1"
    ))
    .bind(workflow_id)
    .fetch_optional(pool)
    .await?;

    Ok(ExecutionAggregate {
        total: row.try_get("total")?,
        completed: row.try_get("completed")?,
        failed: row.try_get("failed")?,
        average_execution_time_ms: row.try_get("average_ms")?,
        last_execution: last.as_ref().map(execution_from_row).transpose()?,
    })
}
