//! Repository functions — one function per database operation.
//!
//! Every function takes a `&DbPool` and returns a `Result<T, DbError>`.
//! No business logic, no engine types — pure SQL. Queries are checked at
//! runtime (`sqlx::query`) so the crate builds without a live database.

pub mod users;
pub mod workflows;
pub mod blocks;
pub mod executions;
