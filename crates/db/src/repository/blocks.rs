//! Block operations.

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    DbError,
    models::{BlockRow, NewBlock},
};

const BLOCK_COLUMNS: &str =
    r#"id, loop_id, type, name, description, config, "order", enabled, created_at"#;

fn block_from_row(row: &PgRow) -> Result<BlockRow, DbError> {
    let config: Json<serde_json::Value> = row.try_get("config")?;
    Ok(BlockRow {
        id: row.try_get("id")?,
        workflow_id: row.try_get("loop_id")?,
        block_type: row.try_get("type")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        config: config.0,
        order: row.try_get("order")?,
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Add a block to a live workflow. A missing `order` appends the block after
/// the current highest one.
pub async fn insert_block(pool: &PgPool, workflow_id: Uuid, block: &NewBlock) -> Result<BlockRow, DbError> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO loop_blocks (id, loop_id, type, name, description, config, "order", enabled, created_at)
        SELECT $1, l.id, $3, $4, $5, $6,
               COALESCE($7, (SELECT MAX("order") + 1 FROM loop_blocks WHERE loop_id = l.id), 0),
               $8, $9
        FROM loops l
        WHERE l.id = $2 AND l.deleted_at IS NULL
        RETURNING {BLOCK_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(workflow_id)
    .bind(&block.block_type)
    .bind(&block.name)
    .bind(&block.description)
    .bind(Json(&block.config))
    .bind(block.order)
    .bind(block.enabled)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    block_from_row(&row)
}

/// All blocks of a workflow by ascending `order`; ties keep creation order.
pub async fn list_blocks(pool: &PgPool, workflow_id: Uuid) -> Result<Vec<BlockRow>, DbError> {
    let rows = sqlx::query(&format!(
        r#"SELECT {BLOCK_COLUMNS} FROM loop_blocks WHERE loop_id = $1 ORDER BY "order" ASC, created_at ASC"#
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(block_from_row).collect()
}

/// Fetch a block only if it belongs to `workflow_id`.
pub async fn get_block(pool: &PgPool, workflow_id: Uuid, block_id: Uuid) -> Result<Option<BlockRow>, DbError> {
    let row = sqlx::query(&format!(
        "SELECT {BLOCK_COLUMNS} FROM loop_blocks WHERE id = $1 AND loop_id = $2"
    ))
    .bind(block_id)
    .bind(workflow_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(block_from_row).transpose()
}
