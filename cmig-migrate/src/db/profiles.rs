//! Target user profiles, read by the actor resolver

use crate::identity::{ProfileLookup, ProfileRecord};
use crate::models::ActorRef;
use async_trait::async_trait;
use cmig_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// [`ProfileLookup`] over the `profiles` table
#[derive(Clone)]
pub struct SqliteProfileLookup {
    pool: SqlitePool,
}

impl SqliteProfileLookup {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn profile_from_row(row: &SqliteRow) -> ProfileRecord {
    ProfileRecord {
        profile_id: row.get("id"),
        external_id: row.get("external_id"),
        email: row.get("email"),
    }
}

#[async_trait]
impl ProfileLookup for SqliteProfileLookup {
    async fn load_all(&self) -> Result<Vec<ProfileRecord>> {
        let rows = sqlx::query("SELECT id, external_id, email FROM profiles")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(profile_from_row).collect())
    }

    async fn find(&self, actor: &ActorRef) -> Result<Option<ProfileRecord>> {
        if let Some(external_id) = &actor.external_id {
            let row = sqlx::query("SELECT id, external_id, email FROM profiles WHERE external_id = ?")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                return Ok(Some(profile_from_row(&row)));
            }
        }

        if let Some(email) = &actor.email {
            let row = sqlx::query(
                "SELECT id, external_id, email FROM profiles WHERE LOWER(email) = LOWER(?) LIMIT 1",
            )
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
            return Ok(row.as_ref().map(profile_from_row));
        }

        Ok(None)
    }
}

/// Insert or replace a profile row
pub async fn upsert_profile(
    pool: &SqlitePool,
    profile_id: &str,
    external_id: Option<&str>,
    email: Option<&str>,
    display_name: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO profiles (id, external_id, email, display_name)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            external_id = excluded.external_id,
            email = excluded.email,
            display_name = excluded.display_name
        "#,
    )
    .bind(profile_id)
    .bind(external_id)
    .bind(email)
    .bind(display_name)
    .execute(pool)
    .await?;
    Ok(())
}
