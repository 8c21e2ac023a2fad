//! Rollback and cleanup
//!
//! Rollback removes only rows carrying the migration provenance marker,
//! children first. Cleanup wipes the entity tables and the local state
//! artifacts. Both refuse to run without their confirmation flag.

use crate::db::{accounts, analyses, cases, purge_entity_tables};
use crate::error::{MigrationError, MigrationResult};
use crate::models::ORIGIN_MIGRATION;
use cmig_common::artifact::remove_artifact;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tracing::{info, warn};

/// Migrated row counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigratedCounts {
    pub accounts: i64,
    pub cases: i64,
    pub analyses: i64,
}

impl MigratedCounts {
    pub async fn load(pool: &SqlitePool) -> MigrationResult<Self> {
        Ok(Self {
            accounts: accounts::count_accounts(pool, Some(ORIGIN_MIGRATION)).await?,
            cases: cases::count_cases(pool, Some(ORIGIN_MIGRATION)).await?,
            analyses: analyses::count_analyses(pool, Some(ORIGIN_MIGRATION)).await?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub before: MigratedCounts,
    pub after: MigratedCounts,
    /// Migrated accounts kept because application cases reference them
    pub retained_accounts: i64,
    pub dry_run: bool,
}

/// Delete every migrated analysis, case and account in one transaction
///
/// `confirmed` is the `CONFIRM_ROLLBACK=yes` flag; without it nothing is
/// touched. A dry run only reports what would go.
pub async fn rollback(pool: &SqlitePool, confirmed: bool, dry_run: bool) -> MigrationResult<RollbackReport> {
    if !confirmed {
        return Err(MigrationError::ConfirmationRequired {
            action: "roll back migrated rows",
            flag: "CONFIRM_ROLLBACK=yes",
        });
    }

    let before = MigratedCounts::load(pool).await?;
    let retained_accounts = accounts::count_migrated_accounts_in_use(pool).await?;

    info!(
        accounts = before.accounts,
        cases = before.cases,
        analyses = before.analyses,
        retained_accounts,
        dry_run,
        "Rolling back migrated rows"
    );

    if dry_run {
        return Ok(RollbackReport {
            before,
            after: before,
            retained_accounts,
            dry_run,
        });
    }

    // All or nothing: a failed account delete leaves cases and analyses in place
    let mut tx = pool.begin().await?;
    let deleted_analyses = analyses::delete_migrated_analyses(&mut tx).await?;
    let deleted_cases = cases::delete_migrated_cases(&mut tx).await?;
    let deleted_accounts = accounts::delete_migrated_accounts(&mut tx).await?;
    tx.commit().await?;

    let after = MigratedCounts::load(pool).await?;
    if after.accounts > 0 {
        warn!(
            retained = after.accounts,
            "Migrated accounts still referenced by application cases were kept"
        );
    }
    info!(
        deleted_accounts,
        deleted_cases,
        deleted_analyses,
        remaining_accounts = after.accounts,
        "Rollback complete"
    );

    Ok(RollbackReport {
        before,
        after,
        retained_accounts,
        dry_run,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub accounts: u64,
    pub cases: u64,
    pub analyses: u64,
    /// State files that existed and were removed
    pub artifacts_removed: usize,
}

/// Wipe the entity tables and the given state artifacts
///
/// `confirmed` is the `FORCE_CLEANUP=true` flag.
pub async fn cleanup(pool: &SqlitePool, confirmed: bool, artifacts: &[PathBuf]) -> MigrationResult<CleanupReport> {
    if !confirmed {
        return Err(MigrationError::ConfirmationRequired {
            action: "wipe the target store",
            flag: "FORCE_CLEANUP=true",
        });
    }

    let purged = purge_entity_tables(pool).await?;

    let mut artifacts_removed = 0;
    for path in artifacts {
        if remove_artifact(path).await? {
            info!(path = %path.display(), "State artifact removed");
            artifacts_removed += 1;
        }
    }

    Ok(CleanupReport {
        accounts: purged.accounts,
        cases: purged.cases,
        analyses: purged.analyses,
        artifacts_removed,
    })
}
