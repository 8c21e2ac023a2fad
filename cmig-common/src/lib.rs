//! # CMIG Common Library
//!
//! Shared code for the case migration tooling:
//! - Error type shared by every crate in the workspace
//! - Layered configuration (defaults → TOML → environment)
//! - Logging initialisation
//! - Crash-safe JSON artifact persistence (checkpoints, manifests, progress)

pub mod artifact;
pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
