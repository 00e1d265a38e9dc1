//! Database layer for the dataspace connector.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. Catalog entries, agreements and their
//! artifact links, pending negotiations, subscriptions and the exchange
//! event log all live in tables created by the migrations in this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: the connector is a single process and the
//!   store is its only shared resource. WAL allows concurrent readers with
//!   a single writer, which matches many parallel exchanges that mostly
//!   read the catalog and occasionally persist an agreement.
//! - **`r2d2` connection pool**: bounded connection reuse for the
//!   blocking worker threads that run persistence work.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`. Invariants that must hold no matter which code path
//!   writes (agreement immutability, append-only artifact links) are
//!   enforced by triggers in those files.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, open_database, DbPool, DbRuntimeSettings, PoolError};
