//! Shared fakes and fixtures for integration tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use seeker::db::{
    ContentType, CreateInstance, CreateSearchQueue, Database, InstanceKind, InstanceRecord,
    SearchQueueRecord, UpsertProwlarrConfig,
};
use seeker::error::SearchError;
use seeker::services::budget::{
    ApplicationInfo, BudgetOracle, BudgetOracleFactory, BudgetResolver, IndexerInfo, IndexerUsage,
};
use seeker::services::health::HEALTH_PAUSE_REASON;
use seeker::services::media::{
    CommandResult, ConnectionTest, MediaClientFactory, MediaServerClient, WantedItem, WantedPage,
    WantedQuery,
};
use seeker::services::notifications::{
    InstanceStatusChange, NotificationEvent, NotificationService, NotificationServiceConfig,
    NotificationSink, QueueFailure, SearchSummary,
};
use seeker::services::{
    CredentialEncryption, EngineConfig, HealthConfig, HealthMonitor, RateLimiterRegistry,
    RetryConfig, SearchEngine,
};

pub const USER_ID: i64 = 1;
pub const INSTANCE_URL: &str = "http://sonarr:8989";

/// Media server that serves a fixed wanted list from memory
#[derive(Default)]
pub struct FakeMediaClient {
    pub items: Mutex<Vec<WantedItem>>,
    pub unreachable: AtomicBool,
    /// Makes `get_wanted` fail with a non-transient error
    pub reject_wanted: AtomicBool,
    pub failing_triggers: Mutex<HashSet<i64>>,
    pub triggered: Mutex<Vec<i64>>,
    pub wanted_calls: AtomicUsize,
    /// Health-pauses this instance's queues from inside `get_wanted`
    pub pause_during_wanted: Mutex<Option<(Database, i64)>>,
}

impl FakeMediaClient {
    pub fn with_items(items: Vec<WantedItem>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn triggered(&self) -> Vec<i64> {
        self.triggered.lock().clone()
    }
}

#[async_trait]
impl MediaServerClient for FakeMediaClient {
    fn kind(&self) -> InstanceKind {
        InstanceKind::Sonarr
    }

    async fn test_connection(&self) -> ConnectionTest {
        if self.unreachable.load(Ordering::SeqCst) {
            ConnectionTest::failed("connection refused", 3)
        } else {
            ConnectionTest::ok(Some("4.0.0".into()), 3)
        }
    }

    async fn get_wanted(&self, query: &WantedQuery, page: u32) -> Result<WantedPage, SearchError> {
        self.wanted_calls.fetch_add(1, Ordering::SeqCst);
        let pause = self.pause_during_wanted.lock().clone();
        if let Some((db, instance_id)) = pause {
            db.queues()
                .pause_for_instance(instance_id, HEALTH_PAUSE_REASON, chrono::Utc::now())
                .await
                .map_err(SearchError::Storage)?;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SearchError::InstanceUnreachable("connection refused".into()));
        }
        if self.reject_wanted.load(Ordering::SeqCst) {
            return Err(SearchError::InstanceAuth { status: 401 });
        }

        let items = self.items.lock();
        let size = query.page_size.max(1) as usize;
        let start = (page.saturating_sub(1) as usize) * size;
        let records = items.iter().skip(start).take(size).cloned().collect();
        Ok(WantedPage {
            records,
            total: items.len() as u64,
        })
    }

    async fn trigger_search(&self, ids: &[i64]) -> Result<CommandResult, SearchError> {
        let failing = self.failing_triggers.lock();
        if ids.iter().any(|id| failing.contains(id)) {
            return Err(SearchError::InstanceApi {
                status: 400,
                message: "series is not monitored".into(),
            });
        }
        drop(failing);

        let mut triggered = self.triggered.lock();
        triggered.extend_from_slice(ids);
        Ok(CommandResult {
            id: triggered.len() as i64,
            name: "EpisodeSearch".into(),
            status: "queued".into(),
        })
    }
}

pub struct FakeClientFactory {
    pub client: Arc<FakeMediaClient>,
}

impl MediaClientFactory for FakeClientFactory {
    fn create(
        &self,
        _kind: InstanceKind,
        _base_url: &str,
        _api_key: &str,
    ) -> Result<Arc<dyn MediaServerClient>, SearchError> {
        Ok(self.client.clone())
    }
}

#[derive(Default, Clone)]
pub struct FakeBudgetOracle {
    pub indexers: Vec<IndexerInfo>,
    pub applications: Vec<ApplicationInfo>,
    pub stats: Vec<IndexerUsage>,
    pub fail: bool,
}

impl FakeBudgetOracle {
    /// One application at [`INSTANCE_URL`] with one limited indexer
    pub fn single(limit: u32, used: u64) -> Self {
        Self {
            indexers: vec![IndexerInfo {
                id: 1,
                name: "tracker".into(),
                enabled: true,
                tags: vec![],
                query_limit: Some(limit),
                disabled_till: None,
            }],
            applications: vec![ApplicationInfo {
                id: 1,
                name: "Sonarr".into(),
                base_url: Some(INSTANCE_URL.into()),
                tags: vec![],
            }],
            stats: vec![IndexerUsage {
                indexer_id: 1,
                queries: used,
            }],
            fail: false,
        }
    }

    fn check(&self) -> Result<(), SearchError> {
        if self.fail {
            Err(SearchError::BudgetOracleUnavailable("prowlarr down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BudgetOracle for FakeBudgetOracle {
    async fn get_indexers(&self) -> Result<Vec<IndexerInfo>, SearchError> {
        self.check()?;
        Ok(self.indexers.clone())
    }

    async fn get_applications(&self) -> Result<Vec<ApplicationInfo>, SearchError> {
        self.check()?;
        Ok(self.applications.clone())
    }

    async fn get_indexer_stats(&self) -> Result<Vec<IndexerUsage>, SearchError> {
        self.check()?;
        Ok(self.stats.clone())
    }
}

pub struct FakeOracleFactory {
    pub oracle: Option<FakeBudgetOracle>,
}

impl BudgetOracleFactory for FakeOracleFactory {
    fn create(&self, _base_url: &str, _api_key: &str) -> Result<Arc<dyn BudgetOracle>, SearchError> {
        match &self.oracle {
            Some(oracle) => Ok(Arc::new(oracle.clone())),
            None => Err(SearchError::BudgetOracleUnavailable("not configured".into())),
        }
    }
}

/// Sink that keeps every event it receives
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_search_summary(&self, summary: &SearchSummary) -> anyhow::Result<()> {
        self.events
            .lock()
            .push(NotificationEvent::SearchSummary(summary.clone()));
        Ok(())
    }

    async fn send_queue_failed(&self, failure: &QueueFailure) -> anyhow::Result<()> {
        self.events
            .lock()
            .push(NotificationEvent::QueueFailed(failure.clone()));
        Ok(())
    }

    async fn send_instance_status(&self, change: &InstanceStatusChange) -> anyhow::Result<()> {
        self.events
            .lock()
            .push(NotificationEvent::InstanceStatus(change.clone()));
        Ok(())
    }
}

pub fn episode(id: i64, series_id: i64, title: &str) -> WantedItem {
    WantedItem {
        id,
        external_id: series_id,
        content_type: ContentType::Series,
        title: title.to_string(),
        content_date: None,
        monitored: true,
    }
}

/// `count` episodes, each from its own series
pub fn episodes(count: i64) -> Vec<WantedItem> {
    (1..=count)
        .map(|i| episode(i, 100 + i, &format!("Show {} - S01E01", i)))
        .collect()
}

pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        page_size: 5,
        max_pages: 10,
        retry: RetryConfig {
            max_retries: 2,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
        },
        ..EngineConfig::default()
    }
}

/// Engine, health monitor and fakes over one in-memory database
pub struct Harness {
    pub db: Database,
    pub client: Arc<FakeMediaClient>,
    pub sink: Arc<RecordingSink>,
    pub engine: Arc<SearchEngine>,
    pub health: Arc<HealthMonitor>,
    pub instance: InstanceRecord,
}

impl Harness {
    pub async fn new(items: Vec<WantedItem>) -> Self {
        Self::build(items, None).await
    }

    /// Harness whose user has an active budget oracle config
    pub async fn with_oracle(items: Vec<WantedItem>, oracle: FakeBudgetOracle) -> Self {
        Self::build(items, Some(oracle)).await
    }

    async fn build(items: Vec<WantedItem>, oracle: Option<FakeBudgetOracle>) -> Self {
        let db = Database::in_memory().await.unwrap();
        let key = CredentialEncryption::generate_key();
        let encryption = Arc::new(CredentialEncryption::from_base64_key(&key).unwrap());

        let (api_key, nonce) = encryption.encrypt("sonarr-api-key").unwrap();
        let instance = db
            .instances()
            .create(
                CreateInstance::new(USER_ID, "Sonarr", InstanceKind::Sonarr, INSTANCE_URL)
                    .with_credentials(api_key, nonce)
                    .with_rate(1000.0),
            )
            .await
            .unwrap();

        if oracle.is_some() {
            let (api_key, nonce) = encryption.encrypt("prowlarr-api-key").unwrap();
            db.prowlarr_configs()
                .upsert(UpsertProwlarrConfig {
                    user_id: USER_ID,
                    url: "http://prowlarr:9696".into(),
                    encrypted_api_key: api_key,
                    api_key_nonce: nonce,
                    is_active: true,
                })
                .await
                .unwrap();
        }

        let client = Arc::new(FakeMediaClient::with_items(items));
        let clients = Arc::new(FakeClientFactory {
            client: client.clone(),
        });
        let sink = Arc::new(RecordingSink::default());
        let notifications = Arc::new(
            NotificationService::new(NotificationServiceConfig {
                channel_capacity: 64,
                sink_timeout: Duration::from_secs(1),
            })
            .with_sink(sink.clone()),
        );
        let budget = Arc::new(BudgetResolver::new(
            db.clone(),
            encryption.clone(),
            Arc::new(FakeOracleFactory { oracle }),
        ));

        let engine = Arc::new(SearchEngine::new(
            db.clone(),
            encryption.clone(),
            clients.clone(),
            budget,
            Arc::new(RateLimiterRegistry::new()),
            notifications.clone(),
            fast_engine_config(),
        ));
        let health = Arc::new(HealthMonitor::new(
            db.clone(),
            encryption,
            clients,
            notifications,
            HealthConfig {
                recovery_threshold: 3,
            },
        ));

        Self {
            db,
            client,
            sink,
            engine,
            health,
            instance,
        }
    }

    pub async fn create_queue(&self, customize: impl FnOnce(&mut CreateSearchQueue)) -> SearchQueueRecord {
        let mut data = CreateSearchQueue::new(USER_ID, self.instance.id, "Missing episodes");
        customize(&mut data);
        self.db.queues().create(data).await.unwrap()
    }

    pub async fn queue(&self, id: i64) -> SearchQueueRecord {
        self.db.queues().get(id).await.unwrap().unwrap()
    }
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
