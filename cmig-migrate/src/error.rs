//! Error types for cmig-migrate
//!
//! Only run-level failures are errors. Per-record problems are collected in
//! [`crate::models::MigrationReport`] and never abort a batch.

use crate::models::Phase;
use thiserror::Error;

/// Fatal migration error
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Missing or invalid configuration (exit code 2)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A phase was started before its prerequisite finished (exit code 2)
    #[error("Phase '{phase}' requires phase '{requires}' to be complete first")]
    PhaseOrder { phase: Phase, requires: Phase },

    /// Destructive operation attempted without its confirmation flag (exit code 2)
    #[error("Refusing to {action}: set {flag} to confirm")]
    ConfirmationRequired { action: &'static str, flag: &'static str },

    /// Source export could not be read
    #[error("Source error: {0}")]
    Source(String),

    /// Checkpoint or progress artifact unreadable
    #[error("State error: {0}")]
    State(String),

    /// Object storage failure outside per-item handling
    #[error("Storage error: {0}")]
    Storage(#[from] crate::blob::StoreError),

    /// cmig-common error
    #[error(transparent)]
    Common(#[from] cmig_common::Error),

    /// Database error outside per-record handling (pool, schema)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl MigrationError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrationError::Config(_)
            | MigrationError::PhaseOrder { .. }
            | MigrationError::ConfirmationRequired { .. } => 2,
            MigrationError::Common(cmig_common::Error::Config(_)) => 2,
            _ => 1,
        }
    }
}

/// Result type for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;
