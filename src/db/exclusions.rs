//! Search exclusion repository
//!
//! Exclusions block an item key from being searched on an instance, either
//! permanently or until `expires_at`.

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use super::library_items::ContentType;

/// Key used to match wanted items against exclusions
pub type ExclusionKey = (String, ContentType);

/// Search exclusion record from database
#[derive(Debug, Clone, FromRow)]
pub struct ExclusionRecord {
    pub id: i64,
    pub user_id: i64,
    pub instance_id: i64,
    pub external_id: String,
    pub content_type: String,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ExclusionRecord {
    /// Active while it has no expiry or the expiry lies in the future
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires| expires > now)
    }
}

/// Data for creating an exclusion
#[derive(Debug, Clone)]
pub struct CreateExclusion {
    pub user_id: i64,
    pub instance_id: i64,
    pub external_id: String,
    pub content_type: ContentType,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Search exclusion database repository
pub struct ExclusionRepository {
    pool: SqlitePool,
}

impl ExclusionRepository {
    /// Create a new repository instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an exclusion
    pub async fn create(&self, data: CreateExclusion) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO search_exclusions (
                user_id, instance_id, external_id, content_type, reason, expires_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(data.user_id)
        .bind(data.instance_id)
        .bind(&data.external_id)
        .bind(data.content_type.as_str())
        .bind(&data.reason)
        .bind(data.expires_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Delete an exclusion
    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM search_exclusions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Keys currently excluded for a user on an instance
    pub async fn active_keys(&self, user_id: i64, instance_id: i64) -> Result<HashSet<ExclusionKey>> {
        self.active_keys_at(user_id, instance_id, Utc::now()).await
    }

    /// Keys excluded at `now`. Expiry is evaluated here rather than in SQL.
    pub async fn active_keys_at(
        &self,
        user_id: i64,
        instance_id: i64,
        now: DateTime<Utc>,
    ) -> Result<HashSet<ExclusionKey>> {
        let records = sqlx::query_as::<_, ExclusionRecord>(
            r#"
            SELECT id, user_id, instance_id, external_id, content_type, reason, expires_at, created_at
            FROM search_exclusions
            WHERE user_id = ? AND instance_id = ?
            "#,
        )
        .bind(user_id)
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .into_iter()
            .filter(|r| r.is_active_at(now))
            .filter_map(|r| {
                let content_type = ContentType::from_name(&r.content_type)?;
                Some((r.external_id, content_type))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;

    #[tokio::test]
    async fn test_expired_exclusions_are_ignored() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.exclusions();
        let now = Utc::now();

        for (external_id, expires_at) in [
            ("1", None),
            ("2", Some(now + Duration::hours(1))),
            ("3", Some(now - Duration::hours(1))),
        ] {
            repo.create(CreateExclusion {
                user_id: 7,
                instance_id: 3,
                external_id: external_id.to_string(),
                content_type: ContentType::Movie,
                reason: None,
                expires_at,
            })
            .await
            .unwrap();
        }

        let keys = repo.active_keys_at(7, 3, now).await.unwrap();
        assert!(keys.contains(&("1".to_string(), ContentType::Movie)));
        assert!(keys.contains(&("2".to_string(), ContentType::Movie)));
        assert!(!keys.contains(&("3".to_string(), ContentType::Movie)));

        // Scoped by user and instance
        assert!(repo.active_keys_at(8, 3, now).await.unwrap().is_empty());
    }
}
