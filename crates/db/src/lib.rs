//! `db` crate — pure persistence layer.
//!
//! Provides typed row structs, the [`Store`] trait the engine talks to, and
//! two implementations of it: [`PgStore`] (Postgres via sqlx) and
//! [`MemoryStore`] (in-process, for tests and one-shot CLI runs). No
//! business logic lives here beyond the atomic updates the engine relies on.

pub mod error;
pub mod pool;
pub mod repository;
pub mod models;
pub mod store;
pub mod memory;
pub mod pg;

pub use pool::DbPool;
pub use error::DbError;
pub use store::Store;
pub use memory::MemoryStore;
pub use pg::PgStore;
