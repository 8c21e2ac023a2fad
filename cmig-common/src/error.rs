//! Common error types for CMIG

use thiserror::Error;

/// Common result type for CMIG operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the migration crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or artifact contents
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for database failures that usually clear up on their own
    /// (lock contention, pool exhaustion, dropped connections).
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            Error::Database(err) => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db_err) => {
                    let message = db_err.message();
                    message.contains("database is locked") || message.contains("database is busy")
                }
                _ => false,
            },
            Error::Io(_) => true,
            _ => false,
        }
    }
}
