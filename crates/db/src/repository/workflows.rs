//! Workflow ("loop") operations.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    DbError,
    models::{NewWorkflow, WorkflowRow},
};

const WORKFLOW_COLUMNS: &str = "id, user_id, name, description, trigger_type, is_active, \
     is_published, execution_count, last_executed_at, tags, category, created_at, deleted_at";

fn workflow_from_row(row: &PgRow) -> Result<WorkflowRow, DbError> {
    let tags: Json<Vec<String>> = row.try_get("tags")?;
    Ok(WorkflowRow {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        trigger_type: row.try_get("trigger_type")?,
        is_active: row.try_get("is_active")?,
        is_published: row.try_get("is_published")?,
        execution_count: row.try_get("execution_count")?,
        last_executed_at: row.try_get("last_executed_at")?,
        tags: tags.0,
        category: row.try_get("category")?,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

/// Insert a new workflow with a zero execution count.
pub async fn create_workflow(pool: &PgPool, workflow: &NewWorkflow) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO loops
            (id, user_id, name, description, trigger_type, is_active, is_published,
             execution_count, tags, category, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10)
        RETURNING {WORKFLOW_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(workflow.user_id)
    .bind(&workflow.name)
    .bind(&workflow.description)
    .bind(&workflow.trigger_type)
    .bind(workflow.is_active)
    .bind(workflow.is_published)
    .bind(Json(&workflow.tags))
    .bind(&workflow.category)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    workflow_from_row(&row)
}

/// Fetch a live (not soft-deleted) workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM loops WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    workflow_from_row(&row)
}

/// Increment the execution counter in place so concurrent completions never
/// lose an update.
pub async fn record_run(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE loops
        SET execution_count = execution_count + 1, last_executed_at = $1
        WHERE id = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(at)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Soft-delete a workflow and cancel its running executions in one
/// transaction. Returns the number of executions cancelled.
///
/// Returns `DbError::NotFound` if the workflow is missing or already deleted.
pub async fn soft_delete_workflow(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("UPDATE loops SET deleted_at = $1 WHERE id = $2 AND deleted_at IS NULL")
        .bind(at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if deleted.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(DbError::NotFound);
    }

    let cancelled = sqlx::query(
        r#"
        UPDATE loop_executions
        SET status = 'cancelled',
            completed_at = $1,
            execution_time_ms = (EXTRACT(EPOCH FROM ($1 - started_at)) * 1000)::BIGINT
        WHERE loop_id = $2 AND status = 'running'
        "#,
    )
    .bind(at)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(cancelled.rows_affected())
}
