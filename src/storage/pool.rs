//! Database connection pool management.
//!
//! This module initializes and configures the SQLite connection pool with:
//! - WAL mode enabled for concurrent access
//! - A bounded connection count
//! - Automatic database file creation

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::sync::Arc;

use log::{error, info};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

use crate::config::DB_MAX_CONNECTIONS;
use crate::error_handling::DatabaseError;

/// Initializes and returns a database connection pool.
///
/// Creates the database file if it doesn't exist and enables WAL mode for
/// better concurrent access. A missing or uncreatable database file is a
/// fatal startup error; pool exhaustion at runtime surfaces as a failed
/// acquire, which the read path treats as a miss.
pub async fn init_db_pool_with_path(
    db_path: &std::path::Path,
) -> Result<Arc<Pool<Sqlite>>, DatabaseError> {
    let db_path_str = db_path.to_string_lossy().to_string();
    match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&db_path_str)
    {
        Ok(_) => info!("Database file created successfully."),
        Err(ref e) if e.kind() == ErrorKind::AlreadyExists => {
            info!("Database file already exists.")
        }
        Err(e) => {
            error!("Failed to create database file: {e}");
            return Err(DatabaseError::FileCreationError(e.to_string()));
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(DB_MAX_CONNECTIONS)
        .connect(&format!("sqlite:{}", db_path_str))
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {e}");
            DatabaseError::SqlError(e)
        })?;

    // Enable WAL mode
    sqlx::query("PRAGMA journal_mode=WAL")
        .execute(&pool)
        .await
        .map_err(|e| {
            error!("Failed to set WAL mode: {e}");
            DatabaseError::SqlError(e)
        })?;

    Ok(Arc::new(pool))
}

/// Connects a single-connection in-memory pool.
///
/// A pooled `sqlite::memory:` database hands every pool connection its own
/// empty database, so the pool is capped at one connection and callers share
/// state through it. Suited to tests and ephemeral deployments.
pub async fn sqlite_memory_pool() -> Result<Pool<Sqlite>, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
}
