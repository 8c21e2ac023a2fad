//! Blob Migration Subsystem
//!
//! Copies audio assets from the legacy bucket to the target bucket:
//! 1. `build_manifest` enumerates the source once and persists the listing
//! 2. `BlobMigrator::migrate_all` transfers in bounded concurrent batches,
//!    saving progress after each batch
//! 3. `apply_url_mappings` points case rows at the new locations

pub mod apply;
pub mod http_store;
pub mod local_store;
pub mod manifest;
pub mod migrator;
pub mod store;

pub use apply::{apply_url_mappings, ApplySummary};
pub use http_store::HttpObjectStore;
pub use local_store::LocalObjectStore;
pub use manifest::{build_manifest, load_manifest, save_manifest};
pub use migrator::{BlobMigrator, Transfer, MAX_ITEM_ATTEMPTS};
pub use store::{MemoryObjectStore, ObjectMeta, ObjectStore};

use thiserror::Error;

/// Object store failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-success HTTP response
    #[error("Storage API returned {status} for {key}: {message}")]
    Http {
        status: u16,
        key: String,
        message: String,
    },

    /// Request never got a response (connect, timeout, reset)
    #[error("Storage request failed: {0}")]
    Transport(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    /// Worth retrying: I/O and transport failures, throttling and 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Io(_) | StoreError::Transport(_) => true,
            StoreError::Http { status, .. } => *status == 429 || *status >= 500,
            StoreError::NotFound(_) | StoreError::InvalidKey(_) => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => StoreError::Http {
                status: status.as_u16(),
                key: err.url().map(|u| u.path().to_string()).unwrap_or_default(),
                message: err.to_string(),
            },
            None => StoreError::Transport(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Transport("connection reset".into()).is_transient());
        assert!(StoreError::Http { status: 503, key: "k".into(), message: String::new() }.is_transient());
        assert!(StoreError::Http { status: 429, key: "k".into(), message: String::new() }.is_transient());
        assert!(!StoreError::Http { status: 403, key: "k".into(), message: String::new() }.is_transient());
        assert!(!StoreError::NotFound("k".into()).is_transient());
    }
}
