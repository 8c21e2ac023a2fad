//! Deterministic target identifiers
//!
//! Target ids are UUIDv5 values over the natural key. A re-run, a resumed run
//! and the blob manifest builder all compute the same id for the same source
//! data without consulting the target store.

use uuid::Uuid;

/// Namespace for all migration-generated ids
const MIGRATION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b7e_94d3_4a51_8e0f_3c2d_71a9_b5e4);

/// Prefix marking case numbers created by the migration
pub const CASE_NUMBER_PREFIX: &str = "MIG-";

pub fn account_id_for(customer_number: &str) -> Uuid {
    Uuid::new_v5(&MIGRATION_NAMESPACE, format!("account:{customer_number}").as_bytes())
}

pub fn case_id_for(source_id: &str) -> Uuid {
    Uuid::new_v5(&MIGRATION_NAMESPACE, format!("case:{source_id}").as_bytes())
}

pub fn analysis_id_for(source_id: &str) -> Uuid {
    Uuid::new_v5(&MIGRATION_NAMESPACE, format!("analysis:{source_id}").as_bytes())
}

/// Case number preserving the original source id
pub fn case_number_for(source_id: &str) -> String {
    format!("{CASE_NUMBER_PREFIX}{source_id}")
}
