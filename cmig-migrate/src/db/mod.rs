//! Target store access
//!
//! SQLite tables for profiles, accounts, cases and analyses. Natural keys
//! (`customer_number`, `case_number`, analysis `case_id`) are UNIQUE so that
//! every migration insert can be `ON CONFLICT DO NOTHING`.

pub mod accounts;
pub mod analyses;
pub mod cases;
pub mod profiles;

use chrono::{DateTime, Utc};
use cmig_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Open (creating if needed) the target database and ensure the schema
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the target tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            external_id TEXT UNIQUE,
            email TEXT,
            display_name TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            customer_number TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            phone TEXT,
            unit TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            source_customer_id TEXT,
            origin TEXT NOT NULL DEFAULT 'app',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cases (
            id TEXT PRIMARY KEY,
            case_number TEXT NOT NULL UNIQUE,
            account_id TEXT NOT NULL REFERENCES accounts(id),
            status TEXT NOT NULL,
            record_type TEXT NOT NULL,
            unit TEXT NOT NULL,
            transcript TEXT NOT NULL DEFAULT '[]',
            summary TEXT,
            audio_url TEXT,
            duration_seconds INTEGER,
            owner_id TEXT NOT NULL,
            source_id TEXT,
            origin TEXT NOT NULL DEFAULT 'app',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL UNIQUE REFERENCES cases(id),
            account_id TEXT NOT NULL REFERENCES accounts(id),
            decision_maker TEXT NOT NULL,
            overall_score INTEGER,
            summary TEXT,
            payload TEXT NOT NULL,
            source_id TEXT,
            origin TEXT NOT NULL DEFAULT 'app',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cases_account ON cases(account_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cases_origin ON cases(origin)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (profiles, accounts, cases, analyses)");

    Ok(())
}

/// Rows removed by [`purge_entity_tables`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    pub accounts: u64,
    pub cases: u64,
    pub analyses: u64,
}

/// Delete every account, case and analysis regardless of origin
///
/// Profiles are left in place. Runs in one transaction.
pub async fn purge_entity_tables(pool: &SqlitePool) -> Result<PurgeCounts> {
    let mut tx = pool.begin().await?;

    let analyses = sqlx::query("DELETE FROM analyses").execute(&mut *tx).await?.rows_affected();
    let cases = sqlx::query("DELETE FROM cases").execute(&mut *tx).await?.rows_affected();
    let accounts = sqlx::query("DELETE FROM accounts").execute(&mut *tx).await?.rows_affected();

    tx.commit().await?;

    tracing::warn!(accounts, cases, analyses, "Entity tables purged");
    Ok(PurgeCounts {
        accounts,
        cases,
        analyses,
    })
}

pub(crate) fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {column} '{value}': {e}")))
}

pub(crate) fn parse_time(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {column} '{value}': {e}")))
}
