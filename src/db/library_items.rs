//! Library item repository
//!
//! Local mirror rows for remote series/movies. The engine only touches the
//! search counters; a missing row means the item was never seen.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

const ITEM_COLUMNS: &str = r#"
    id, instance_id, external_id, content_type, title, search_attempts,
    last_searched_at, grabs_confirmed, last_grab_at, created_at, updated_at
"#;

/// Kind of remote content an item key refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Series,
    Movie,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Series => "series",
            ContentType::Movie => "movie",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "series" => Some(ContentType::Series),
            "movie" => Some(ContentType::Movie),
            _ => None,
        }
    }
}

/// Library item record from database
#[derive(Debug, Clone, FromRow)]
pub struct LibraryItemRecord {
    pub id: i64,
    pub instance_id: i64,
    pub external_id: String,
    pub content_type: String,
    pub title: Option<String>,
    pub search_attempts: i64,
    pub last_searched_at: Option<DateTime<Utc>>,
    pub grabs_confirmed: i64,
    pub last_grab_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LibraryItemRecord {
    /// Searches that have not (yet) produced a confirmed grab
    pub fn consecutive_failures(&self) -> i64 {
        (self.search_attempts - self.grabs_confirmed).max(0)
    }

    pub fn grab_rate(&self) -> f64 {
        if self.search_attempts <= 0 {
            return 0.0;
        }
        self.grabs_confirmed as f64 / self.search_attempts as f64
    }
}

/// Library item database repository
pub struct LibraryItemRepository {
    pool: SqlitePool,
}

impl LibraryItemRepository {
    /// Create a new repository instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find one mirror row by its remote key
    pub async fn find(
        &self,
        instance_id: i64,
        external_id: &str,
        content_type: ContentType,
    ) -> Result<Option<LibraryItemRecord>> {
        let record = sqlx::query_as::<_, LibraryItemRecord>(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM library_items
            WHERE instance_id = ? AND external_id = ? AND content_type = ?
            "#
        ))
        .bind(instance_id)
        .bind(external_id)
        .bind(content_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// All mirror rows of an instance, keyed by `(external_id, content_type)`
    pub async fn map_for_instance(
        &self,
        instance_id: i64,
    ) -> Result<HashMap<(String, ContentType), LibraryItemRecord>> {
        let records = sqlx::query_as::<_, LibraryItemRecord>(&format!(
            "SELECT {ITEM_COLUMNS} FROM library_items WHERE instance_id = ?"
        ))
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .into_iter()
            .filter_map(|r| {
                let content_type = ContentType::from_name(&r.content_type)?;
                Some(((r.external_id.clone(), content_type), r))
            })
            .collect())
    }

    /// Count one search attempt, creating the mirror row if it does not exist
    pub async fn record_search(
        &self,
        instance_id: i64,
        external_id: &str,
        content_type: ContentType,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO library_items (
                instance_id, external_id, content_type, title, search_attempts,
                last_searched_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT (instance_id, external_id, content_type) DO UPDATE SET
                search_attempts = search_attempts + 1,
                last_searched_at = excluded.last_searched_at,
                title = COALESCE(excluded.title, title),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(instance_id)
        .bind(external_id)
        .bind(content_type.as_str())
        .bind(title)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count one confirmed grab
    pub async fn record_grab(
        &self,
        instance_id: i64,
        external_id: &str,
        content_type: ContentType,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO library_items (
                instance_id, external_id, content_type, grabs_confirmed,
                last_grab_at, created_at, updated_at
            )
            VALUES (?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT (instance_id, external_id, content_type) DO UPDATE SET
                grabs_confirmed = grabs_confirmed + 1,
                last_grab_at = excluded.last_grab_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(instance_id)
        .bind(external_id)
        .bind(content_type.as_str())
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CreateInstance, Database, InstanceKind};

    #[tokio::test]
    async fn test_record_search_and_grab() {
        let db = Database::in_memory().await.unwrap();
        let instance = db
            .instances()
            .create(CreateInstance::new(1, "sonarr", InstanceKind::Sonarr, "http://sonarr:8989"))
            .await
            .unwrap();
        let repo = db.library_items();

        assert!(repo.find(instance.id, "42", ContentType::Series).await.unwrap().is_none());

        let now = Utc::now();
        repo.record_search(instance.id, "42", ContentType::Series, "Show", now).await.unwrap();
        repo.record_search(instance.id, "42", ContentType::Series, "Show", now).await.unwrap();
        repo.record_grab(instance.id, "42", ContentType::Series, now).await.unwrap();

        let item = repo.find(instance.id, "42", ContentType::Series).await.unwrap().unwrap();
        assert_eq!(item.search_attempts, 2);
        assert_eq!(item.grabs_confirmed, 1);
        assert_eq!(item.consecutive_failures(), 1);
        assert!((item.grab_rate() - 0.5).abs() < f64::EPSILON);

        let map = repo.map_for_instance(instance.id).await.unwrap();
        assert!(map.contains_key(&("42".to_string(), ContentType::Series)));
    }

    #[test]
    fn test_derived_fields_without_attempts() {
        let now = Utc::now();
        let item = LibraryItemRecord {
            id: 1,
            instance_id: 1,
            external_id: "1".into(),
            content_type: "movie".into(),
            title: None,
            search_attempts: 0,
            last_searched_at: None,
            grabs_confirmed: 3,
            last_grab_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(item.consecutive_failures(), 0);
        assert_eq!(item.grab_rate(), 0.0);
    }
}
