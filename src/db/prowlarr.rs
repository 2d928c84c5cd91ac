//! Prowlarr configuration repository
//!
//! One optional budget source per user.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

/// Prowlarr config record from database
#[derive(Debug, Clone, FromRow)]
pub struct ProwlarrConfigRecord {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub encrypted_api_key: String,
    pub api_key_nonce: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for creating/updating a user's Prowlarr config
#[derive(Debug, Clone)]
pub struct UpsertProwlarrConfig {
    pub user_id: i64,
    pub url: String,
    pub encrypted_api_key: String,
    pub api_key_nonce: String,
    pub is_active: bool,
}

/// Prowlarr config database repository
pub struct ProwlarrConfigRepository {
    pool: SqlitePool,
}

impl ProwlarrConfigRepository {
    /// Create a new repository instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create or replace a user's config
    pub async fn upsert(&self, data: UpsertProwlarrConfig) -> Result<ProwlarrConfigRecord> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, ProwlarrConfigRecord>(
            r#"
            INSERT INTO prowlarr_configs (
                user_id, url, encrypted_api_key, api_key_nonce, is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                url = excluded.url,
                encrypted_api_key = excluded.encrypted_api_key,
                api_key_nonce = excluded.api_key_nonce,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            RETURNING id, user_id, url, encrypted_api_key, api_key_nonce, is_active,
                      created_at, updated_at
            "#,
        )
        .bind(data.user_id)
        .bind(&data.url)
        .bind(&data.encrypted_api_key)
        .bind(&data.api_key_nonce)
        .bind(data.is_active)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// The user's config if one exists and is active
    pub async fn get_active_for_user(&self, user_id: i64) -> Result<Option<ProwlarrConfigRecord>> {
        let record = sqlx::query_as::<_, ProwlarrConfigRecord>(
            r#"
            SELECT id, user_id, url, encrypted_api_key, api_key_nonce, is_active,
                   created_at, updated_at
            FROM prowlarr_configs
            WHERE user_id = ? AND is_active = 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}
