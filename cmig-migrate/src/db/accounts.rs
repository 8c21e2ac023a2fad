//! Account rows

use super::{parse_time, parse_uuid};
use crate::models::{TargetAccount, ORIGIN_MIGRATION};
use cmig_common::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Insert a migrated account unless one with the same customer number exists
///
/// Returns `true` when a row was written.
pub async fn insert_account_if_absent(pool: &SqlitePool, account: &TargetAccount) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO accounts (
            id, customer_number, name, phone, unit, owner_id,
            source_customer_id, origin, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(account.id.to_string())
    .bind(&account.customer_number)
    .bind(&account.name)
    .bind(&account.phone)
    .bind(&account.unit)
    .bind(&account.owner_id)
    .bind(&account.source_customer_id)
    .bind(ORIGIN_MIGRATION)
    .bind(account.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Id of the account holding `customer_number`, whoever created it
pub async fn find_account_id(pool: &SqlitePool, customer_number: &str) -> Result<Option<Uuid>> {
    let id: Option<String> =
        sqlx::query_scalar("SELECT id FROM accounts WHERE customer_number = ?")
            .bind(customer_number)
            .fetch_optional(pool)
            .await?;

    id.map(|id| parse_uuid("accounts.id", &id)).transpose()
}

/// customer_number → id for every account in the store
pub async fn load_account_index(pool: &SqlitePool) -> Result<HashMap<String, Uuid>> {
    let rows = sqlx::query("SELECT id, customer_number FROM accounts")
        .fetch_all(pool)
        .await?;

    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        let id: String = row.get("id");
        let customer_number: String = row.get("customer_number");
        index.insert(customer_number, parse_uuid("accounts.id", &id)?);
    }
    Ok(index)
}

/// Full account row by customer number
pub async fn fetch_account(pool: &SqlitePool, customer_number: &str) -> Result<Option<TargetAccount>> {
    let row = sqlx::query(
        r#"
        SELECT id, customer_number, name, phone, unit, owner_id, source_customer_id, created_at
        FROM accounts
        WHERE customer_number = ?
        "#,
    )
    .bind(customer_number)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: String = row.get("id");
    let created_at: String = row.get("created_at");
    let source_customer_id: Option<String> = row.get("source_customer_id");

    Ok(Some(TargetAccount {
        id: parse_uuid("accounts.id", &id)?,
        customer_number: row.get("customer_number"),
        name: row.get("name"),
        phone: row.get("phone"),
        unit: row.get("unit"),
        owner_id: row.get("owner_id"),
        source_customer_id: source_customer_id.unwrap_or_default(),
        created_at: parse_time("accounts.created_at", &created_at)?,
    }))
}

/// Number of accounts, optionally restricted to one origin
pub async fn count_accounts(pool: &SqlitePool, origin: Option<&str>) -> Result<i64> {
    let count: i64 = match origin {
        Some(origin) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE origin = ?")
                .bind(origin)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

/// Customer numbers of every migrated account
pub async fn load_migrated_customer_numbers(pool: &SqlitePool) -> Result<BTreeSet<String>> {
    let numbers: Vec<String> =
        sqlx::query_scalar("SELECT customer_number FROM accounts WHERE origin = ?")
            .bind(ORIGIN_MIGRATION)
            .fetch_all(pool)
            .await?;
    Ok(numbers.into_iter().collect())
}

/// Customer numbers of every account, whoever created it
pub async fn load_customer_numbers(pool: &SqlitePool) -> Result<BTreeSet<String>> {
    let numbers: Vec<String> = sqlx::query_scalar("SELECT customer_number FROM accounts")
        .fetch_all(pool)
        .await?;
    Ok(numbers.into_iter().collect())
}

/// Migrated accounts whose required columns are blank
pub async fn count_accounts_missing_required(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM accounts
        WHERE origin = ?
          AND (TRIM(name) = '' OR TRIM(unit) = '' OR TRIM(owner_id) = '' OR TRIM(customer_number) = '')
        "#,
    )
    .bind(ORIGIN_MIGRATION)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Migrated accounts owned by `owner_id`
pub async fn count_migrated_accounts_owned_by(pool: &SqlitePool, owner_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE origin = ? AND owner_id = ?")
        .bind(ORIGIN_MIGRATION)
        .bind(owner_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Migrated accounts still referenced by application-created cases
pub async fn count_migrated_accounts_in_use(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM accounts a
        WHERE a.origin = ?
          AND EXISTS (SELECT 1 FROM cases c WHERE c.account_id = a.id AND c.origin <> ?)
        "#,
    )
    .bind(ORIGIN_MIGRATION)
    .bind(ORIGIN_MIGRATION)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Delete migrated accounts that no remaining case references
pub async fn delete_migrated_accounts(conn: &mut SqliteConnection) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM accounts
        WHERE origin = ?
          AND NOT EXISTS (SELECT 1 FROM cases c WHERE c.account_id = accounts.id)
          AND NOT EXISTS (SELECT 1 FROM analyses n WHERE n.account_id = accounts.id)
        "#,
    )
    .bind(ORIGIN_MIGRATION)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
