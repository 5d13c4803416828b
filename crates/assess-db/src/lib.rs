//! Database layer for the assessment backend.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and the query helpers for users, questions,
//! sessions and responses.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single backend process owns the data; WAL
//!   allows concurrent readers with a single writer.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` so the schema ships with the server.
//! - **Append-only responses**: there is no update or delete helper for
//!   responses.

mod migrations;
mod pool;
pub mod questions;
pub mod sessions;
pub mod users;

use thiserror::Error;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};

/// Errors returned by the query helpers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid data: {0}")]
    Invalid(String),
}
