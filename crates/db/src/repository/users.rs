//! User and credit-ledger operations.

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    DbError,
    models::{NewUser, Plan, UserRow},
};

const USER_COLUMNS: &str = "id, name, plan, credits_used, credits_limit, created_at";

fn user_from_row(row: &PgRow) -> Result<UserRow, DbError> {
    let plan: String = row.try_get("plan")?;
    Ok(UserRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        plan: plan.parse::<Plan>().map_err(DbError::Corrupt)?,
        credits_used: row.try_get("credits_used")?,
        credits_limit: row.try_get("credits_limit")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Insert a new user with no credits consumed.
pub async fn create_user(pool: &PgPool, user: &NewUser) -> Result<UserRow, DbError> {
    let row = sqlx::query(&format!(
        "INSERT INTO users (id, name, plan, credits_used, credits_limit, created_at) \
         VALUES ($1, $2, $3, 0, $4, $5) RETURNING {USER_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&user.name)
    .bind(user.plan.to_string())
    .bind(user.credits_limit)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    user_from_row(&row)
}

/// Fetch a single user by primary key.
pub async fn get_user(pool: &PgPool, id: Uuid) -> Result<UserRow, DbError> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;

    user_from_row(&row)
}

/// Increment `credits_used` by `amount` only when the result stays within
/// `credits_limit`. The check and the increment are one statement, so
/// concurrent executions cannot overspend.
///
/// Returns `DbError::NotFound` if the user does not exist.
pub async fn try_deduct_credits(pool: &PgPool, user_id: Uuid, amount: i64) -> Result<bool, DbError> {
    let updated = sqlx::query(
        r#"
        UPDATE users
        SET credits_used = credits_used + $1
        WHERE id = $2 AND credits_used + $1 <= credits_limit
        "#,
    )
    .bind(amount)
    .bind(user_id)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 1 {
        return Ok(true);
    }

    // Distinguish "limit reached" from "no such user".
    get_user(pool, user_id).await?;
    Ok(false)
}

/// Reset the consumed credits of a user to zero.
pub async fn reset_credits(pool: &PgPool, user_id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE users SET credits_used = 0 WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
