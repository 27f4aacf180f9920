//! Postgres connection pool.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

/// Type alias for the shared Postgres pool used by [`crate::PgStore`].
pub type DbPool = PgPool;

/// How long a caller waits for a free connection before giving up.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a pool against `database_url` capped at `max_connections`.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    info!(max_connections, "connecting to loops database");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the embedded migrations (users, loops, loop_blocks, loop_executions).
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!("applying loops schema migrations");
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
