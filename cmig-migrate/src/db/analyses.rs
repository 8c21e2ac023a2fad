//! Analysis rows

use super::{parse_time, parse_uuid};
use crate::models::{DecisionMaker, TargetAnalysis, ORIGIN_MIGRATION};
use cmig_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Insert a migrated analysis unless the case already has one
///
/// Returns `true` when a row was written.
pub async fn insert_analysis_if_absent(pool: &SqlitePool, analysis: &TargetAnalysis) -> Result<bool> {
    let payload = serde_json::to_string(&analysis.payload)
        .map_err(|e| Error::Internal(format!("Failed to serialize analysis payload: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO analyses (
            id, case_id, account_id, decision_maker, overall_score, summary,
            payload, source_id, origin, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(analysis.id.to_string())
    .bind(analysis.case_id.to_string())
    .bind(analysis.account_id.to_string())
    .bind(analysis.decision_maker.as_str())
    .bind(analysis.overall_score)
    .bind(&analysis.summary)
    .bind(&payload)
    .bind(&analysis.source_id)
    .bind(ORIGIN_MIGRATION)
    .bind(analysis.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Whether `case_id` already has an analysis
pub async fn analysis_exists(pool: &SqlitePool, case_id: Uuid) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM analyses WHERE case_id = ?")
        .bind(case_id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Analysis attached to `case_id`
pub async fn fetch_analysis(pool: &SqlitePool, case_id: Uuid) -> Result<Option<TargetAnalysis>> {
    let row = sqlx::query(
        r#"
        SELECT id, case_id, account_id, decision_maker, overall_score, summary,
               payload, source_id, created_at
        FROM analyses
        WHERE case_id = ?
        "#,
    )
    .bind(case_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: String = row.get("id");
    let case_id: String = row.get("case_id");
    let account_id: String = row.get("account_id");
    let decision_maker: String = row.get("decision_maker");
    let payload: String = row.get("payload");
    let source_id: Option<String> = row.get("source_id");
    let created_at: String = row.get("created_at");

    let payload = serde_json::from_str(&payload)
        .map_err(|e| Error::Internal(format!("Failed to deserialize analysis payload: {}", e)))?;
    let decision_maker = match decision_maker.as_str() {
        "yes" => DecisionMaker::Yes,
        "no" => DecisionMaker::No,
        _ => DecisionMaker::Unknown,
    };

    Ok(Some(TargetAnalysis {
        id: parse_uuid("analyses.id", &id)?,
        case_id: parse_uuid("analyses.case_id", &case_id)?,
        account_id: parse_uuid("analyses.account_id", &account_id)?,
        decision_maker,
        overall_score: row.get("overall_score"),
        summary: row.get("summary"),
        payload,
        source_id: source_id.unwrap_or_default(),
        created_at: parse_time("analyses.created_at", &created_at)?,
    }))
}

/// Number of analyses, optionally restricted to one origin
pub async fn count_analyses(pool: &SqlitePool, origin: Option<&str>) -> Result<i64> {
    let count: i64 = match origin {
        Some(origin) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM analyses WHERE origin = ?")
                .bind(origin)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM analyses")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

/// Source ids behind every migrated analysis
pub async fn load_migrated_analysis_sources(pool: &SqlitePool) -> Result<BTreeSet<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT source_id FROM analyses WHERE origin = ? AND source_id IS NOT NULL",
    )
    .bind(ORIGIN_MIGRATION)
    .fetch_all(pool)
    .await?;
    Ok(ids.into_iter().collect())
}

/// Migrated analyses whose case or account is missing
pub async fn count_orphan_analyses(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM analyses n
        WHERE n.origin = ?
          AND (NOT EXISTS (SELECT 1 FROM cases c WHERE c.id = n.case_id)
               OR NOT EXISTS (SELECT 1 FROM accounts a WHERE a.id = n.account_id))
        "#,
    )
    .bind(ORIGIN_MIGRATION)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Migrated analyses whose required columns are blank
pub async fn count_analyses_missing_required(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM analyses
        WHERE origin = ?
          AND (TRIM(decision_maker) = '' OR TRIM(payload) = '' OR TRIM(case_id) = '')
        "#,
    )
    .bind(ORIGIN_MIGRATION)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Delete every migrated analysis
pub async fn delete_migrated_analyses(conn: &mut SqliteConnection) -> Result<u64> {
    let result = sqlx::query("DELETE FROM analyses WHERE origin = ?")
        .bind(ORIGIN_MIGRATION)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
