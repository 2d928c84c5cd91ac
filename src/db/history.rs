//! Search history repository
//!
//! One append-only audit row per execution. The row is opened when a run
//! starts and finalized exactly once; a finalized row is never updated again.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

const HISTORY_COLUMNS: &str = r#"
    id, queue_id, instance_id, user_id, strategy, started_at, completed_at,
    duration_ms, items_found, items_searched, searches_triggered, status,
    error_message, max_items, limit_source
"#;

/// Final classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Success => "success",
            HistoryStatus::PartialSuccess => "partial_success",
            HistoryStatus::Failed => "failed",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "success" => Some(HistoryStatus::Success),
            "partial_success" => Some(HistoryStatus::PartialSuccess),
            "failed" => Some(HistoryStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search history record from database
#[derive(Debug, Clone, FromRow)]
pub struct SearchHistoryRecord {
    pub id: i64,
    pub queue_id: i64,
    pub instance_id: i64,
    pub user_id: i64,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub items_found: i64,
    pub items_searched: i64,
    pub searches_triggered: i64,
    pub status: Option<String>,
    pub error_message: Option<String>,
    pub max_items: Option<i64>,
    pub limit_source: Option<String>,
}

impl SearchHistoryRecord {
    pub fn status(&self) -> Option<HistoryStatus> {
        self.status.as_deref().and_then(HistoryStatus::from_name)
    }
}

/// Counters written when a run is finalized
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchRunCounts {
    pub items_found: i64,
    pub items_searched: i64,
    pub searches_triggered: i64,
    pub max_items: Option<i64>,
    pub limit_source: Option<String>,
}

/// Search history database repository
pub struct HistoryRepository {
    pool: SqlitePool,
}

impl HistoryRepository {
    /// Create a new repository instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a history row for a run that is starting now
    pub async fn start(
        &self,
        queue_id: i64,
        instance_id: i64,
        user_id: i64,
        strategy: &str,
        started_at: DateTime<Utc>,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO search_history (queue_id, instance_id, user_id, strategy, started_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(queue_id)
        .bind(instance_id)
        .bind(user_id)
        .bind(strategy)
        .bind(started_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Finalize a history row. Fails if the row was already finalized.
    pub async fn finish(
        &self,
        id: i64,
        status: HistoryStatus,
        counts: &SearchRunCounts,
        error_message: Option<&str>,
        completed_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE search_history
            SET status = ?, items_found = ?, items_searched = ?, searches_triggered = ?,
                max_items = ?, limit_source = ?, error_message = ?, completed_at = ?,
                duration_ms = ?
            WHERE id = ? AND completed_at IS NULL
            "#,
        )
        .bind(status.as_str())
        .bind(counts.items_found)
        .bind(counts.items_searched)
        .bind(counts.searches_triggered)
        .bind(counts.max_items)
        .bind(counts.limit_source.as_deref())
        .bind(error_message)
        .bind(completed_at)
        .bind(duration_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("History row {} is missing or already finalized", id));
        }
        Ok(())
    }

    /// Close every still-open row of a queue as failed. Returns how many were closed.
    pub async fn abandon_open(&self, queue_id: i64, error_message: &str, completed_at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE search_history
            SET status = ?, error_message = ?, completed_at = ?
            WHERE queue_id = ? AND completed_at IS NULL
            "#,
        )
        .bind(HistoryStatus::Failed.as_str())
        .bind(error_message)
        .bind(completed_at)
        .bind(queue_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Get a history row by ID
    pub async fn get(&self, id: i64) -> Result<Option<SearchHistoryRecord>> {
        let record = sqlx::query_as::<_, SearchHistoryRecord>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM search_history WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Most recent runs of a queue, newest first
    pub async fn list_for_queue(&self, queue_id: i64, limit: i64) -> Result<Vec<SearchHistoryRecord>> {
        let records = sqlx::query_as::<_, SearchHistoryRecord>(&format!(
            r#"
            SELECT {HISTORY_COLUMNS} FROM search_history
            WHERE queue_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#
        ))
        .bind(queue_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
