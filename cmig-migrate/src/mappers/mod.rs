//! Entity Mappers
//!
//! Pure functions from a typed source record to one target entity. No store
//! access: everything a mapper needs from elsewhere (resolved owner, parent
//! ids, the run timestamp) is passed in.

mod account;
mod analysis;
mod case;
pub mod tables;

pub use account::map_account;
pub use analysis::map_analysis;
pub use case::map_case;

use chrono::{DateTime, Utc};

/// Values supplied by the orchestrator for one record
#[derive(Debug, Clone)]
pub struct MapContext {
    /// Resolved owner profile id (or the service-account sentinel)
    pub owner_id: String,
    /// Timestamp used when the source record has none
    pub migrated_at: DateTime<Utc>,
}

impl MapContext {
    pub fn new(owner_id: impl Into<String>, migrated_at: DateTime<Utc>) -> Self {
        Self {
            owner_id: owner_id.into(),
            migrated_at,
        }
    }
}
