//! Error type definitions.

use log::SetLoggerError;
use reqwest::Error as ReqwestError;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] ReqwestError),
}

/// Error types for database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error creating the database file.
    #[error("Database file creation error: {0}")]
    FileCreationError(String),

    /// SQL execution error.
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// Error types for local index files (exact index, radix tree, XDB).
#[derive(Error, Debug)]
pub enum LocalDbError {
    /// Underlying file I/O error.
    #[error("index file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with the expected magic bytes.
    #[error("bad index magic")]
    BadMagic,

    /// A structural invariant of the file does not hold.
    #[error("bad index layout: {0}")]
    BadLayout(String),

    /// The embedded JSON header failed to parse.
    #[error("bad index header: {0}")]
    BadHeader(#[from] serde_json::Error),
}
