//! Case rows

use super::{parse_time, parse_uuid};
use crate::models::{CaseStatus, RecordType, TargetCase, TranscriptSegment, ORIGIN_MIGRATION};
use chrono::{DateTime, Utc};
use cmig_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Parent links of a stored case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseLink {
    pub id: Uuid,
    pub account_id: Uuid,
}

/// Where a source case landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseTarget {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Migrated case holding a source-store audio reference
#[derive(Debug, Clone, PartialEq)]
pub struct CaseAudioRef {
    pub case_id: Uuid,
    pub audio_url: String,
    pub created_at: DateTime<Utc>,
}

/// Insert a migrated case unless one with the same case number exists
///
/// Returns `true` when a row was written.
pub async fn insert_case_if_absent(pool: &SqlitePool, case: &TargetCase) -> Result<bool> {
    let transcript = serde_json::to_string(&case.transcript)
        .map_err(|e| Error::Internal(format!("Failed to serialize transcript: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO cases (
            id, case_number, account_id, status, record_type, unit, transcript,
            summary, audio_url, duration_seconds, owner_id, source_id, origin,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(case.id.to_string())
    .bind(&case.case_number)
    .bind(case.account_id.to_string())
    .bind(case.status.as_str())
    .bind(case.record_type.as_str())
    .bind(&case.unit)
    .bind(&transcript)
    .bind(&case.summary)
    .bind(&case.audio_url)
    .bind(case.duration_seconds)
    .bind(&case.owner_id)
    .bind(&case.source_id)
    .bind(ORIGIN_MIGRATION)
    .bind(case.created_at.to_rfc3339())
    .bind(case.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn case_exists(pool: &SqlitePool, case_number: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM cases WHERE case_number = ?")
        .bind(case_number)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Id and parent account of the case with `case_number`
pub async fn find_case_link(pool: &SqlitePool, case_number: &str) -> Result<Option<CaseLink>> {
    let row = sqlx::query("SELECT id, account_id FROM cases WHERE case_number = ?")
        .bind(case_number)
        .fetch_optional(pool)
        .await?;

    row.map(|row| {
        let id: String = row.get("id");
        let account_id: String = row.get("account_id");
        Ok(CaseLink {
            id: parse_uuid("cases.id", &id)?,
            account_id: parse_uuid("cases.account_id", &account_id)?,
        })
    })
    .transpose()
}

fn case_from_row(row: &SqliteRow) -> Result<TargetCase> {
    let id: String = row.get("id");
    let account_id: String = row.get("account_id");
    let status: String = row.get("status");
    let record_type: String = row.get("record_type");
    let transcript: String = row.get("transcript");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let source_id: Option<String> = row.get("source_id");

    let transcript: Vec<TranscriptSegment> = serde_json::from_str(&transcript)
        .map_err(|e| Error::Internal(format!("Failed to deserialize transcript: {}", e)))?;

    Ok(TargetCase {
        id: parse_uuid("cases.id", &id)?,
        case_number: row.get("case_number"),
        account_id: parse_uuid("cases.account_id", &account_id)?,
        status: status.parse::<CaseStatus>().map_err(Error::Internal)?,
        record_type: record_type.parse::<RecordType>().map_err(Error::Internal)?,
        unit: row.get("unit"),
        transcript,
        summary: row.get("summary"),
        audio_url: row.get("audio_url"),
        duration_seconds: row.get("duration_seconds"),
        owner_id: row.get("owner_id"),
        source_id: source_id.unwrap_or_default(),
        created_at: parse_time("cases.created_at", &created_at)?,
        updated_at: parse_time("cases.updated_at", &updated_at)?,
    })
}

/// Full case row by case number
pub async fn fetch_case(pool: &SqlitePool, case_number: &str) -> Result<Option<TargetCase>> {
    let row = sqlx::query(
        r#"
        SELECT id, case_number, account_id, status, record_type, unit, transcript,
               summary, audio_url, duration_seconds, owner_id, source_id,
               created_at, updated_at
        FROM cases
        WHERE case_number = ?
        "#,
    )
    .bind(case_number)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(case_from_row).transpose()
}

/// Number of cases, optionally restricted to one origin
pub async fn count_cases(pool: &SqlitePool, origin: Option<&str>) -> Result<i64> {
    let count: i64 = match origin {
        Some(origin) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM cases WHERE origin = ?")
                .bind(origin)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM cases")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

/// Case numbers of every migrated case
pub async fn load_migrated_case_numbers(pool: &SqlitePool) -> Result<BTreeSet<String>> {
    let numbers: Vec<String> = sqlx::query_scalar("SELECT case_number FROM cases WHERE origin = ?")
        .bind(ORIGIN_MIGRATION)
        .fetch_all(pool)
        .await?;
    Ok(numbers.into_iter().collect())
}

/// source_id → stored case for every migrated case
pub async fn load_case_targets_by_source(pool: &SqlitePool) -> Result<HashMap<String, CaseTarget>> {
    let rows = sqlx::query(
        "SELECT id, source_id, created_at FROM cases WHERE origin = ? AND source_id IS NOT NULL",
    )
    .bind(ORIGIN_MIGRATION)
    .fetch_all(pool)
    .await?;

    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        let id: String = row.get("id");
        let source_id: String = row.get("source_id");
        let created_at: String = row.get("created_at");
        index.insert(
            source_id,
            CaseTarget {
                id: parse_uuid("cases.id", &id)?,
                created_at: parse_time("cases.created_at", &created_at)?,
            },
        );
    }
    Ok(index)
}

/// Migrated cases whose parent account does not exist
pub async fn count_orphan_cases(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM cases c
        WHERE c.origin = ?
          AND NOT EXISTS (SELECT 1 FROM accounts a WHERE a.id = c.account_id)
        "#,
    )
    .bind(ORIGIN_MIGRATION)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Migrated cases whose required columns are blank
pub async fn count_cases_missing_required(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM cases
        WHERE origin = ?
          AND (TRIM(case_number) = '' OR TRIM(status) = '' OR TRIM(record_type) = ''
               OR TRIM(unit) = '' OR TRIM(owner_id) = '' OR TRIM(account_id) = '')
        "#,
    )
    .bind(ORIGIN_MIGRATION)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Migrated cases owned by `owner_id`
pub async fn count_migrated_cases_owned_by(pool: &SqlitePool, owner_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cases WHERE origin = ? AND owner_id = ?")
        .bind(ORIGIN_MIGRATION)
        .bind(owner_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Migrated cases that still carry an audio reference
pub async fn load_cases_with_audio(pool: &SqlitePool) -> Result<Vec<CaseAudioRef>> {
    let rows = sqlx::query(
        r#"
        SELECT id, audio_url, created_at FROM cases
        WHERE origin = ? AND audio_url IS NOT NULL AND audio_url <> ''
        ORDER BY created_at, id
        "#,
    )
    .bind(ORIGIN_MIGRATION)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            let created_at: String = row.get("created_at");
            Ok(CaseAudioRef {
                case_id: parse_uuid("cases.id", &id)?,
                audio_url: row.get("audio_url"),
                created_at: parse_time("cases.created_at", &created_at)?,
            })
        })
        .collect()
}

/// Point a case's audio at its new location
///
/// Rows whose audio already lives under `target_base` are left alone; returns
/// `true` when the row changed.
pub async fn update_audio_url(
    pool: &SqlitePool,
    case_id: Uuid,
    new_url: &str,
    target_base: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE cases SET audio_url = ?
        WHERE id = ?
          AND (audio_url IS NULL OR substr(audio_url, 1, length(?)) <> ?)
        "#,
    )
    .bind(new_url)
    .bind(case_id.to_string())
    .bind(target_base)
    .bind(target_base)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Delete every migrated case; analyses must already be gone
pub async fn delete_migrated_cases(conn: &mut SqliteConnection) -> Result<u64> {
    let result = sqlx::query("DELETE FROM cases WHERE origin = ?")
        .bind(ORIGIN_MIGRATION)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Application-created cases (never touched by rollback)
pub async fn count_app_cases(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cases WHERE origin <> ?")
        .bind(ORIGIN_MIGRATION)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::accounts::insert_account_if_absent;
    use crate::db::test_support::temp_pool;
    use crate::models::ids::{account_id_for, case_id_for, case_number_for};
    use crate::models::TargetAccount;
    use chrono::TimeZone;

    async fn seed_account(pool: &SqlitePool) -> Uuid {
        let account = TargetAccount {
            id: account_id_for("C-1"),
            customer_number: "C-1".into(),
            name: "C-1".into(),
            phone: None,
            unit: "general".into(),
            owner_id: "p-1".into(),
            source_customer_id: "C-1".into(),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };
        insert_account_if_absent(pool, &account).await.unwrap();
        account.id
    }

    fn case(source_id: &str, account_id: Uuid) -> TargetCase {
        TargetCase {
            id: case_id_for(source_id),
            case_number: case_number_for(source_id),
            account_id,
            status: CaseStatus::Analyzed,
            record_type: RecordType::Call,
            unit: "general".into(),
            transcript: vec![TranscriptSegment {
                speaker: "customer".into(),
                text: "Interested".into(),
                start: 1.5,
                end: 3.0,
            }],
            summary: Some("Follow up next week".into()),
            audio_url: Some("gs://legacy/recordings/a.webm".into()),
            duration_seconds: Some(42),
            owner_id: "p-1".into(),
            source_id: source_id.to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 3, 5, 5, 6, 7).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let (_dir, pool) = temp_pool().await;
        let account_id = seed_account(&pool).await;
        let c = case("S1", account_id);

        assert!(insert_case_if_absent(&pool, &c).await.unwrap());
        assert!(!insert_case_if_absent(&pool, &c).await.unwrap());
        assert!(case_exists(&pool, "MIG-S1").await.unwrap());

        let fetched = fetch_case(&pool, "MIG-S1").await.unwrap().unwrap();
        assert_eq!(fetched, c);
        assert_eq!(
            find_case_link(&pool, "MIG-S1").await.unwrap(),
            Some(CaseLink { id: c.id, account_id })
        );
    }

    #[tokio::test]
    async fn test_audio_url_update_skips_already_moved() {
        let (_dir, pool) = temp_pool().await;
        let account_id = seed_account(&pool).await;
        let c = case("S1", account_id);
        insert_case_if_absent(&pool, &c).await.unwrap();

        let base = "https://store.example/case-audio/";
        let new_url = format!("{base}cases/2025/03/{}.webm", c.id);
        assert!(update_audio_url(&pool, c.id, &new_url, base).await.unwrap());
        assert!(!update_audio_url(&pool, c.id, &new_url, base).await.unwrap());

        let refs = load_cases_with_audio(&pool).await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].audio_url, new_url);
    }

    #[tokio::test]
    async fn test_no_orphans_with_parent_present() {
        let (_dir, pool) = temp_pool().await;
        let account_id = seed_account(&pool).await;
        insert_case_if_absent(&pool, &case("S1", account_id)).await.unwrap();

        assert_eq!(count_orphan_cases(&pool).await.unwrap(), 0);
        assert_eq!(count_cases_missing_required(&pool).await.unwrap(), 0);
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(delete_migrated_cases(&mut conn).await.unwrap(), 1);
        drop(conn);
        assert_eq!(count_cases(&pool, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_stored_record_type_is_an_error() {
        let (_dir, pool) = temp_pool().await;
        let account_id = seed_account(&pool).await;
        insert_case_if_absent(&pool, &case("S1", account_id)).await.unwrap();
        sqlx::query("UPDATE cases SET record_type = 'fax' WHERE case_number = 'MIG-S1'")
            .execute(&pool)
            .await
            .unwrap();

        let err = fetch_case(&pool, "MIG-S1").await.unwrap_err();
        assert!(err.to_string().contains("unknown record type 'fax'"), "{err}");
    }
}
