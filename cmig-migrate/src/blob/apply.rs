//! Apply final asset locations to case rows

use crate::db::cases::update_audio_url;
use crate::error::MigrationResult;
use crate::models::UrlMappingArtifact;
use crate::utils::{with_retry, RetryPolicy};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Outcome of one apply pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    /// Rows whose audio url was rewritten
    pub updated: u64,
    /// Rows already pointing under the target base (or missing entirely)
    pub already_final: u64,
    /// Mappings whose case row does not exist
    pub missing_case: u64,
    pub failed: u64,
}

/// Point every mapped case at its migrated asset
///
/// Re-runnable: rows whose url already starts with `target_base` are left
/// untouched and counted as final.
pub async fn apply_url_mappings(
    pool: &SqlitePool,
    artifact: &UrlMappingArtifact,
    target_base: &str,
    policy: &RetryPolicy,
    dry_run: bool,
) -> MigrationResult<ApplySummary> {
    let mut summary = ApplySummary::default();

    for mapping in &artifact.mappings {
        let case_id = mapping.target_case_id.to_string();

        let current: Option<Option<String>> = with_retry(
            "apply_url_lookup",
            policy,
            cmig_common::Error::is_transient,
            || async {
                sqlx::query_scalar::<_, Option<String>>("SELECT audio_url FROM cases WHERE id = ?")
                    .bind(&case_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(cmig_common::Error::from)
            },
        )
        .await?;

        let Some(current) = current else {
            warn!(case_id = %mapping.target_case_id, "Mapped case not found");
            summary.missing_case += 1;
            continue;
        };

        if current.as_deref().is_some_and(|url| url.starts_with(target_base)) {
            summary.already_final += 1;
            continue;
        }

        if dry_run {
            summary.updated += 1;
            continue;
        }

        let result = with_retry(
            "apply_url_update",
            policy,
            cmig_common::Error::is_transient,
            || update_audio_url(pool, mapping.target_case_id, &mapping.target_uri, target_base),
        )
        .await;

        match result {
            Ok(true) => summary.updated += 1,
            Ok(false) => summary.already_final += 1,
            Err(e) => {
                warn!(case_id = %mapping.target_case_id, error = %e, "Failed to update audio url");
                summary.failed += 1;
            }
        }
    }

    info!(
        updated = summary.updated,
        already_final = summary.already_final,
        missing_case = summary.missing_case,
        failed = summary.failed,
        dry_run,
        "Audio urls applied"
    );
    Ok(summary)
}
