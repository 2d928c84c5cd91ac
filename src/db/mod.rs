//! Database connection and operations
//!
//! Every table has its own repository; [`Database`] hands them out over a
//! shared SQLite pool.

pub mod exclusions;
pub mod history;
pub mod instances;
pub mod leases;
pub mod library_items;
pub mod prowlarr;
pub mod queues;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::warn;

pub use exclusions::{CreateExclusion, ExclusionKey, ExclusionRecord, ExclusionRepository};
pub use history::{HistoryRepository, HistoryStatus, SearchHistoryRecord, SearchRunCounts};
pub use instances::{CreateInstance, InstanceKind, InstanceRecord, InstanceRepository};
pub use leases::{LeaseRepository, QueueLease};
pub use library_items::{ContentType, LibraryItemRecord, LibraryItemRepository};
pub use prowlarr::{ProwlarrConfigRecord, ProwlarrConfigRepository, UpsertProwlarrConfig};
pub use queues::{
    CooldownMode, CreateSearchQueue, QueueFilters, QueueFailureUpdate, QueueStatus,
    SearchQueueRecord, SearchQueueRepository, SearchStrategy,
};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new database connection pool and apply migrations
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {}", url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("Failed to open database")?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Create a new database connection pool with retry logic
    /// Retries every `retry_interval` until `attempts` is exhausted
    pub async fn connect_with_retry(
        url: &str,
        max_connections: u32,
        retry_interval: Duration,
        attempts: u32,
    ) -> Result<Self> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::connect(url, max_connections).await {
                Ok(db) => return Ok(db),
                Err(e) if attempt < attempts => {
                    warn!(
                        attempt = attempt,
                        retry_in_secs = retry_interval.as_secs(),
                        error = %e,
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Private in-memory database with migrations applied.
    ///
    /// SQLite in-memory databases live per connection, so the pool is pinned to
    /// a single connection that is never recycled.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get a search queue repository
    pub fn queues(&self) -> SearchQueueRepository {
        SearchQueueRepository::new(self.pool.clone())
    }

    /// Get an instance repository
    pub fn instances(&self) -> InstanceRepository {
        InstanceRepository::new(self.pool.clone())
    }

    /// Get a library item (local mirror) repository
    pub fn library_items(&self) -> LibraryItemRepository {
        LibraryItemRepository::new(self.pool.clone())
    }

    /// Get a search history repository
    pub fn history(&self) -> HistoryRepository {
        HistoryRepository::new(self.pool.clone())
    }

    /// Get a search exclusion repository
    pub fn exclusions(&self) -> ExclusionRepository {
        ExclusionRepository::new(self.pool.clone())
    }

    /// Get a Prowlarr config repository
    pub fn prowlarr_configs(&self) -> ProwlarrConfigRepository {
        ProwlarrConfigRepository::new(self.pool.clone())
    }

    /// Get a queue lease repository
    pub fn leases(&self) -> LeaseRepository {
        LeaseRepository::new(self.pool.clone())
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}
