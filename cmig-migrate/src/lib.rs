//! cmig-migrate library interface
//!
//! Moves historical case records from a document export into the relational
//! target store, and their audio assets into the target bucket. Exposed as a
//! library for the `cmig` binary and integration tests.

pub mod blob;
pub mod checkpoint;
pub mod db;
pub mod error;
pub mod identity;
pub mod mappers;
pub mod models;
pub mod orchestrator;
pub mod rollback;
pub mod source;
pub mod utils;
pub mod validator;

pub use crate::checkpoint::CheckpointStore;
pub use crate::error::{MigrationError, MigrationResult};
pub use crate::orchestrator::{MigrationOrchestrator, OrchestratorOptions};
pub use crate::validator::Validator;
