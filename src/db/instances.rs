//! Media-server instance repository
//!
//! Stores connection details (with the API key encrypted) and the health
//! subset maintained by the health monitor. The success and failure streaks
//! are mutually exclusive: every update increments one and zeroes the other.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

const INSTANCE_COLUMNS: &str = r#"
    id, user_id, name, instance_type, url, encrypted_api_key, api_key_nonce,
    rate_limit_per_second, is_active, last_connection_success, connection_error,
    consecutive_failures, consecutive_successes, last_healthy_at,
    response_time_ms, created_at, updated_at
"#;

/// The kind of media server behind an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    Sonarr,
    Radarr,
}

impl InstanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceKind::Sonarr => "sonarr",
            InstanceKind::Radarr => "radarr",
        }
    }
}

impl std::fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstanceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sonarr" => Ok(InstanceKind::Sonarr),
            "radarr" => Ok(InstanceKind::Radarr),
            _ => Err(anyhow::anyhow!("Unknown instance type: {}", s)),
        }
    }
}

/// Instance record from database
#[derive(Debug, Clone, FromRow)]
pub struct InstanceRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub instance_type: String,
    pub url: String,
    pub encrypted_api_key: String,
    pub api_key_nonce: String,
    pub rate_limit_per_second: f64,
    pub is_active: bool,
    pub last_connection_success: Option<bool>,
    pub connection_error: Option<String>,
    pub consecutive_failures: i64,
    pub consecutive_successes: i64,
    pub last_healthy_at: Option<DateTime<Utc>>,
    pub response_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn kind(&self) -> Result<InstanceKind> {
        self.instance_type.parse()
    }
}

/// Data for creating a new instance
#[derive(Debug, Clone)]
pub struct CreateInstance {
    pub user_id: i64,
    pub name: String,
    pub kind: InstanceKind,
    pub url: String,
    pub encrypted_api_key: String,
    pub api_key_nonce: String,
    pub rate_limit_per_second: f64,
}

impl CreateInstance {
    /// Instance with placeholder credentials and the default pacing rate
    pub fn new(user_id: i64, name: &str, kind: InstanceKind, url: &str) -> Self {
        Self {
            user_id,
            name: name.to_string(),
            kind,
            url: url.to_string(),
            encrypted_api_key: String::new(),
            api_key_nonce: String::new(),
            rate_limit_per_second: 0.5,
        }
    }

    pub fn with_credentials(mut self, encrypted_api_key: String, nonce: String) -> Self {
        self.encrypted_api_key = encrypted_api_key;
        self.api_key_nonce = nonce;
        self
    }

    pub fn with_rate(mut self, rate_limit_per_second: f64) -> Self {
        self.rate_limit_per_second = rate_limit_per_second;
        self
    }
}

/// Instance database repository
pub struct InstanceRepository {
    pool: SqlitePool,
}

impl InstanceRepository {
    /// Create a new repository instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new instance
    pub async fn create(&self, data: CreateInstance) -> Result<InstanceRecord> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, InstanceRecord>(&format!(
            r#"
            INSERT INTO instances (
                user_id, name, instance_type, url, encrypted_api_key, api_key_nonce,
                rate_limit_per_second, is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(data.user_id)
        .bind(&data.name)
        .bind(data.kind.as_str())
        .bind(&data.url)
        .bind(&data.encrypted_api_key)
        .bind(&data.api_key_nonce)
        .bind(data.rate_limit_per_second)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get an instance by ID
    pub async fn get(&self, id: i64) -> Result<Option<InstanceRecord>> {
        let record = sqlx::query_as::<_, InstanceRecord>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List all active instances
    pub async fn list_active(&self) -> Result<Vec<InstanceRecord>> {
        let records = sqlx::query_as::<_, InstanceRecord>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE is_active = 1 ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Enable or disable an instance
    pub async fn set_active(&self, id: i64, is_active: bool) -> Result<()> {
        sqlx::query("UPDATE instances SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a successful probe. Returns the success streak after the increment.
    pub async fn mark_healthy(
        &self,
        id: i64,
        response_time_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let (successes,): (i64,) = sqlx::query_as(
            r#"
            UPDATE instances
            SET consecutive_successes = consecutive_successes + 1,
                consecutive_failures = 0,
                last_connection_success = 1,
                connection_error = NULL,
                last_healthy_at = ?,
                response_time_ms = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING consecutive_successes
            "#,
        )
        .bind(now)
        .bind(response_time_ms)
        .bind(now)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(successes)
    }

    /// Record a failed probe. Returns the failure streak after the increment.
    pub async fn mark_unhealthy(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<i64> {
        let (failures,): (i64,) = sqlx::query_as(
            r#"
            UPDATE instances
            SET consecutive_failures = consecutive_failures + 1,
                consecutive_successes = 0,
                last_connection_success = 0,
                connection_error = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING consecutive_failures
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(failures)
    }
}
