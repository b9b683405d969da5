//! Relational store gateway.
//!
//! This module provides:
//! - Database connection pool management (SQLite with WAL mode)
//! - Embedded schema migrations
//! - The tiered lookup queries (override-KV, legacy exact, CIDR specials)
//! - Override upserts with the anti-flap guard
//! - Monotonic stats counters and the recent-IP log
//!
//! Read errors inside the serving path are downgraded to a miss; write
//! errors are surfaced to the caller, which logs and swallows them.

pub mod lookup;
pub mod migrations;
pub mod models;
pub mod overrides;
pub mod pool;
pub mod stats;

// Re-export commonly used items
pub use migrations::run_migrations;
pub use models::Totals;
pub use pool::init_db_pool_with_path;

use sqlx::SqlitePool;

/// Database access entry point: holds the pool and provides the query,
/// upsert, and stats operations used by the pipeline.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
