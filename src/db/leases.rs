//! Queue lease repository
//!
//! A lease is a persisted, time-bounded claim on a queue. Acquisition is a
//! single conditional upsert, so two executors (threads or processes sharing
//! the database) can never both hold a live lease for the same queue.
//! Timestamps are unix milliseconds so expiry can be compared in SQL.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, SqlitePool};

/// Lease row from database
#[derive(Debug, Clone, FromRow)]
pub struct QueueLease {
    pub queue_id: i64,
    pub holder: String,
    pub acquired_at_ms: i64,
    pub expires_at_ms: i64,
}

/// Queue lease database repository
pub struct LeaseRepository {
    pool: SqlitePool,
}

impl LeaseRepository {
    /// Create a new repository instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Try to take the lease for `queue_id`.
    ///
    /// Succeeds when no lease exists or the existing one has expired.
    pub async fn try_acquire(
        &self,
        queue_id: i64,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_ms = now.timestamp_millis();
        let expires_ms = (now + ttl).timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO queue_leases (queue_id, holder, acquired_at_ms, expires_at_ms)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (queue_id) DO UPDATE SET
                holder = excluded.holder,
                acquired_at_ms = excluded.acquired_at_ms,
                expires_at_ms = excluded.expires_at_ms
            WHERE queue_leases.expires_at_ms <= ?
            "#,
        )
        .bind(queue_id)
        .bind(holder)
        .bind(now_ms)
        .bind(expires_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release a lease held by `holder`. Releasing someone else's lease is a no-op.
    pub async fn release(&self, queue_id: i64, holder: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_leases WHERE queue_id = ? AND holder = ?")
            .bind(queue_id)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Current lease row, live or not
    pub async fn get(&self, queue_id: i64) -> Result<Option<QueueLease>> {
        let lease = sqlx::query_as::<_, QueueLease>(
            "SELECT queue_id, holder, acquired_at_ms, expires_at_ms FROM queue_leases WHERE queue_id = ?",
        )
        .bind(queue_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lease)
    }

    /// Drop every lease that expired before `now`
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM queue_leases WHERE expires_at_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_lease_is_exclusive_until_expiry() {
        let db = Database::in_memory().await.unwrap();
        let leases = db.leases();
        let now = Utc::now();
        let ttl = Duration::minutes(10);

        assert!(leases.try_acquire(1, "worker-a", ttl, now).await.unwrap());
        assert!(!leases.try_acquire(1, "worker-b", ttl, now).await.unwrap());

        // After expiry another worker may take over
        let later = now + Duration::minutes(11);
        assert!(leases.try_acquire(1, "worker-b", ttl, later).await.unwrap());
        assert_eq!(leases.get(1).await.unwrap().unwrap().holder, "worker-b");

        // The old holder cannot release the new holder's lease
        assert!(!leases.release(1, "worker-a").await.unwrap());
        assert!(leases.release(1, "worker-b").await.unwrap());
        assert!(leases.try_acquire(1, "worker-a", ttl, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let db = Database::in_memory().await.unwrap();
        let leases = db.leases();
        let now = Utc::now();
        leases.try_acquire(1, "a", Duration::seconds(1), now).await.unwrap();
        leases.try_acquire(2, "a", Duration::hours(1), now).await.unwrap();

        let purged = leases.purge_expired(now + Duration::seconds(5)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(leases.get(1).await.unwrap().is_none());
        assert!(leases.get(2).await.unwrap().is_some());
    }
}
