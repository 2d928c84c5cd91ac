//! Search queue database repository
//!
//! A queue is one schedulable unit of search work bound to a single instance.
//! Lifecycle transitions (in progress, completed, failed, health pause) are
//! single-row updates so that the engine and the health monitor can write
//! concurrently with last-writer-wins semantics.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Number of consecutive failed runs after which a queue deactivates itself.
pub const MAX_CONSECUTIVE_FAILURES: i64 = 5;

const QUEUE_COLUMNS: &str = r#"
    id, user_id, instance_id, name, strategy, is_recurring, interval_hours,
    next_run, last_run, status, is_active, consecutive_failures,
    max_items_per_run, cooldown_mode, cooldown_hours, filters,
    error_message, pause_reason, deleted_at, created_at, updated_at
"#;

/// Which wanted list a queue searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    #[default]
    Missing,
    CutoffUnmet,
    Recent,
    Custom,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Missing => "missing",
            SearchStrategy::CutoffUnmet => "cutoff_unmet",
            SearchStrategy::Recent => "recent",
            SearchStrategy::Custom => "custom",
        }
    }

    /// Lenient parse; anything unrecognised is treated as a custom queue.
    pub fn from_name(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "missing" => SearchStrategy::Missing,
            "cutoff_unmet" | "cutoff" | "upgrade" => SearchStrategy::CutoffUnmet,
            "recent" => SearchStrategy::Recent,
            _ => SearchStrategy::Custom,
        }
    }
}

impl std::fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted queue status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_name(s: &str) -> Self {
        match s {
            "in_progress" => QueueStatus::InProgress,
            "completed" => QueueStatus::Completed,
            "failed" => QueueStatus::Failed,
            "cancelled" => QueueStatus::Cancelled,
            _ => QueueStatus::Pending,
        }
    }
}

/// How the per-item cooldown window is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CooldownMode {
    #[default]
    Adaptive,
    Flat,
}

impl CooldownMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CooldownMode::Adaptive => "adaptive",
            CooldownMode::Flat => "flat",
        }
    }

    pub fn from_name(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "flat" => CooldownMode::Flat,
            _ => CooldownMode::Adaptive,
        }
    }
}

/// Free-form queue filters, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueFilters {
    /// Wanted list a custom queue draws from (missing unless cutoff_unmet)
    pub source: Option<SearchStrategy>,
    /// Only keep items released/aired within this many days
    pub recent_days: Option<i64>,
    /// Case-insensitive title substring
    pub title_contains: Option<String>,
    /// Restrict to these series ids (Sonarr) or movie ids (Radarr)
    pub parent_ids: Vec<i64>,
    pub monitored_only: bool,
}

impl Default for QueueFilters {
    fn default() -> Self {
        Self {
            source: None,
            recent_days: None,
            title_contains: None,
            parent_ids: Vec::new(),
            monitored_only: true,
        }
    }
}

/// Search queue record from database
#[derive(Debug, Clone, FromRow)]
pub struct SearchQueueRecord {
    pub id: i64,
    pub user_id: i64,
    pub instance_id: i64,
    pub name: String,
    pub strategy: String,
    pub is_recurring: bool,
    pub interval_hours: Option<i64>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub status: String,
    pub is_active: bool,
    pub consecutive_failures: i64,
    pub max_items_per_run: i64,
    pub cooldown_mode: String,
    pub cooldown_hours: f64,
    pub filters: Option<String>,
    pub error_message: Option<String>,
    pub pause_reason: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchQueueRecord {
    pub fn strategy(&self) -> SearchStrategy {
        SearchStrategy::from_name(&self.strategy)
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus::from_name(&self.status)
    }

    pub fn cooldown_mode(&self) -> CooldownMode {
        CooldownMode::from_name(&self.cooldown_mode)
    }

    /// Parsed filters; malformed JSON degrades to defaults.
    pub fn filters(&self) -> QueueFilters {
        self.filters
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    /// Recurrence interval, if the queue recurs with a positive interval
    pub fn interval(&self) -> Option<Duration> {
        if !self.is_recurring {
            return None;
        }
        self.interval_hours
            .filter(|h| *h > 0)
            .map(Duration::hours)
    }

    /// Next fire time when re-armed from `now`
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.interval().map(|interval| now + interval)
    }

    /// Per-run item cap, never negative
    pub fn max_items(&self) -> usize {
        self.max_items_per_run.max(0) as usize
    }

    /// Whether the scheduler should hold a timer for this queue
    pub fn is_schedulable(&self) -> bool {
        self.is_active
            && self.deleted_at.is_none()
            && (self.is_recurring
                || matches!(self.status(), QueueStatus::Pending | QueueStatus::InProgress))
    }
}

/// Data for creating a new search queue
#[derive(Debug, Clone)]
pub struct CreateSearchQueue {
    pub user_id: i64,
    pub instance_id: i64,
    pub name: String,
    pub strategy: SearchStrategy,
    pub is_recurring: bool,
    pub interval_hours: Option<i64>,
    pub next_run: Option<DateTime<Utc>>,
    pub max_items_per_run: i64,
    pub cooldown_mode: CooldownMode,
    pub cooldown_hours: f64,
    pub filters: Option<QueueFilters>,
}

impl CreateSearchQueue {
    /// A one-shot queue with default settings
    pub fn new(user_id: i64, instance_id: i64, name: impl Into<String>) -> Self {
        Self {
            user_id,
            instance_id,
            name: name.into(),
            strategy: SearchStrategy::Missing,
            is_recurring: false,
            interval_hours: None,
            next_run: None,
            max_items_per_run: 50,
            cooldown_mode: CooldownMode::Adaptive,
            cooldown_hours: 24.0,
            filters: None,
        }
    }
}

/// Counter state returned after recording a failed run
#[derive(Debug, Clone, Copy, FromRow)]
pub struct QueueFailureUpdate {
    pub consecutive_failures: i64,
    pub is_active: bool,
    pub is_recurring: bool,
    pub interval_hours: Option<i64>,
}

/// Search queue database repository
pub struct SearchQueueRepository {
    pool: SqlitePool,
}

impl SearchQueueRepository {
    /// Create a new repository instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new search queue
    pub async fn create(&self, data: CreateSearchQueue) -> Result<SearchQueueRecord> {
        let now = Utc::now();
        let filters = data
            .filters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let record = sqlx::query_as::<_, SearchQueueRecord>(&format!(
            r#"
            INSERT INTO search_queues (
                user_id, instance_id, name, strategy, is_recurring, interval_hours,
                next_run, max_items_per_run, cooldown_mode, cooldown_hours, filters,
                status, is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 1, ?, ?)
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(data.user_id)
        .bind(data.instance_id)
        .bind(&data.name)
        .bind(data.strategy.as_str())
        .bind(data.is_recurring)
        .bind(data.interval_hours)
        .bind(data.next_run)
        .bind(data.max_items_per_run)
        .bind(data.cooldown_mode.as_str())
        .bind(data.cooldown_hours)
        .bind(filters)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get a queue by ID (soft-deleted queues are invisible)
    pub async fn get(&self, id: i64) -> Result<Option<SearchQueueRecord>> {
        let record = sqlx::query_as::<_, SearchQueueRecord>(&format!(
            "SELECT {QUEUE_COLUMNS} FROM search_queues WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List active queues that should hold a scheduler timer
    pub async fn list_schedulable(&self) -> Result<Vec<SearchQueueRecord>> {
        let records = sqlx::query_as::<_, SearchQueueRecord>(&format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM search_queues
            WHERE is_active = 1 AND deleted_at IS NULL
              AND (is_recurring = 1 OR status IN ('pending', 'in_progress'))
            ORDER BY id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// List all live queues bound to an instance
    pub async fn list_for_instance(&self, instance_id: i64) -> Result<Vec<SearchQueueRecord>> {
        let records = sqlx::query_as::<_, SearchQueueRecord>(&format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM search_queues
            WHERE instance_id = ? AND deleted_at IS NULL
            ORDER BY id ASC
            "#
        ))
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Mark a queue as running
    pub async fn mark_in_progress(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE search_queues SET status = 'in_progress', updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Move a queue left `in_progress` by an interrupted run to `failed`
    pub async fn abandon_in_progress(&self, id: i64, now: DateTime<Utc>, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_queues
            SET status = 'failed', error_message = ?, updated_at = ?
            WHERE id = ? AND status = 'in_progress'
            "#,
        )
        .bind(message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a successful (or partially successful) run.
    ///
    /// Resets the failure streak and re-arms `next_run` (None for one-shot queues).
    pub async fn mark_completed(
        &self,
        id: i64,
        now: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE search_queues
            SET status = 'completed', consecutive_failures = 0, last_run = ?,
                next_run = ?, error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(next_run)
        .bind(error_message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed run, incrementing the failure streak.
    ///
    /// Returns the counters after the increment so the caller can apply the
    /// auto-deactivation rule.
    pub async fn record_failure(
        &self,
        id: i64,
        now: DateTime<Utc>,
        error_message: &str,
    ) -> Result<QueueFailureUpdate> {
        let update = sqlx::query_as::<_, QueueFailureUpdate>(
            r#"
            UPDATE search_queues
            SET status = 'failed', consecutive_failures = consecutive_failures + 1,
                last_run = ?, next_run = NULL, error_message = ?, updated_at = ?
            WHERE id = ?
            RETURNING consecutive_failures, is_active, is_recurring, interval_hours
            "#,
        )
        .bind(now)
        .bind(error_message)
        .bind(now)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(update)
    }

    /// Deactivate a queue, overwriting its error message
    pub async fn deactivate(&self, id: i64, now: DateTime<Utc>, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE search_queues
            SET is_active = 0, next_run = NULL, pause_reason = NULL, error_message = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set the next fire time
    pub async fn set_next_run(&self, id: i64, next_run: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query("UPDATE search_queues SET next_run = ?, updated_at = ? WHERE id = ?")
            .bind(next_run)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Pause every active queue on an instance with a machine-matchable reason.
    ///
    /// Returns the ids of the queues that were paused.
    pub async fn pause_for_instance(
        &self,
        instance_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            r#"
            UPDATE search_queues
            SET is_active = 0, pause_reason = ?, updated_at = ?
            WHERE instance_id = ? AND is_active = 1 AND deleted_at IS NULL
            RETURNING id
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Resume only queues paused on this instance with exactly `reason`.
    /// Queues that hit the failure limit stay inactive.
    ///
    /// Returns the ids of the queues that were resumed.
    pub async fn resume_paused(
        &self,
        instance_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            r#"
            UPDATE search_queues
            SET is_active = 1, pause_reason = NULL, updated_at = ?
            WHERE instance_id = ? AND is_active = 0 AND pause_reason = ?
              AND consecutive_failures < ? AND deleted_at IS NULL
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(instance_id)
        .bind(reason)
        .bind(MAX_CONSECUTIVE_FAILURES)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Pause a queue by hand. Manual pauses are never resumed by the health monitor.
    pub async fn pause(&self, id: i64, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE search_queues SET is_active = 0, pause_reason = ?, updated_at = ? WHERE id = ?",
        )
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Manually reactivate a queue, clearing its failure streak
    pub async fn reactivate(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE search_queues
            SET is_active = 1, consecutive_failures = 0, status = 'pending',
                error_message = NULL, pause_reason = NULL, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Soft-delete a queue
    pub async fn soft_delete(&self, id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE search_queues
            SET deleted_at = ?, is_active = 0, status = 'cancelled', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Put `in_progress` queues without a live lease back to `pending`.
    ///
    /// Called on scheduler start so an interrupted run cannot leave a queue
    /// stuck forever.
    pub async fn reconcile_stale_in_progress(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE search_queues
            SET status = 'pending', updated_at = ?
            WHERE status = 'in_progress'
              AND id NOT IN (SELECT queue_id FROM queue_leases WHERE expires_at_ms > ?)
            "#,
        )
        .bind(now)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
