//! Database layer for the Arbor federation engine.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. Every table the store and the federation
//! responders touch is created through versioned migrations managed here.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a tree is a single sovereign process with no
//!   external database server. WAL lets readers proceed while the cascade
//!   engine holds its write transaction.
//! - **Embedded migrations**: SQL files are compiled in via `include_str!`
//!   so the schema ships with the binary.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
