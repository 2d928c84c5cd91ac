//! Queue execution engine
//!
//! Runs one search queue end to end: admission (existence, active flag,
//! lease), wanted-list collection, exclusion and cooldown filtering,
//! prioritization, paced search triggers and bookkeeping. After admission
//! every failure is folded into the history row and queue state. Storage
//! failures while recording the outcome escape, after the queue is moved out
//! of `in_progress` and its open history row is closed where possible.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::db::queues::MAX_CONSECUTIVE_FAILURES;
use crate::db::{CooldownMode, Database, HistoryStatus, SearchQueueRecord, SearchRunCounts};
use crate::error::SearchError;
use crate::jobs::scheduler::QueueRunner;
use crate::services::budget::BudgetResolver;
use crate::services::cooldown::is_in_cooldown_at;
use crate::services::encryption::CredentialEncryption;
use crate::services::media::{MediaClientFactory, MediaServerClient, WantedItem, WantedQuery};
use crate::services::notifications::{NotificationService, QueueFailure, SearchSummary};
use crate::services::priority::compute_score_at;
use crate::services::rate_limiter::{RateLimiterRegistry, RetryConfig, retry_async};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Records requested per wanted page
    pub page_size: u32,
    /// Upper bound on wanted pages per run
    pub max_pages: u32,
    /// Flat cooldown used when a queue has no positive value of its own
    pub default_cooldown_hours: f64,
    /// Lease lifetime; a crashed run frees its queue after this long
    pub lease_ttl: Duration,
    /// Retry policy for transient wanted-page failures
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_pages: 20,
            default_cooldown_hours: 24.0,
            lease_ttl: Duration::from_secs(120 * 60),
            retry: RetryConfig::default(),
        }
    }
}

/// What one execution did
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub queue_id: i64,
    pub history_id: i64,
    pub status: HistoryStatus,
    pub items_found: i64,
    pub items_searched: i64,
    pub searches_triggered: i64,
    /// Next fire time if the queue stays scheduled
    pub next_run: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub error: Option<String>,
}

/// Mutable tally of a run; survives early exits so partial counts are kept
#[derive(Debug, Default)]
struct RunReport {
    counts: SearchRunCounts,
    failed_triggers: i64,
    error: Option<String>,
    aborted: bool,
}

impl RunReport {
    fn status(&self) -> HistoryStatus {
        let failed = self.aborted || self.failed_triggers > 0;
        match (failed, self.counts.searches_triggered > 0) {
            (false, _) => HistoryStatus::Success,
            (true, true) => HistoryStatus::PartialSuccess,
            (true, false) => HistoryStatus::Failed,
        }
    }
}

pub struct SearchEngine {
    db: Database,
    encryption: Arc<CredentialEncryption>,
    clients: Arc<dyn MediaClientFactory>,
    budget: Arc<BudgetResolver>,
    limiter: Arc<RateLimiterRegistry>,
    notifications: Arc<NotificationService>,
    config: EngineConfig,
}

impl SearchEngine {
    pub fn new(
        db: Database,
        encryption: Arc<CredentialEncryption>,
        clients: Arc<dyn MediaClientFactory>,
        budget: Arc<BudgetResolver>,
        limiter: Arc<RateLimiterRegistry>,
        notifications: Arc<NotificationService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            encryption,
            clients,
            budget,
            limiter,
            notifications,
            config,
        }
    }

    /// Execute one queue.
    ///
    /// Rejects with `QueueNotFound`, `QueueInactive` or `QueueBusy` before any
    /// side effect; otherwise always records a history row.
    #[instrument(skip(self))]
    pub async fn execute_queue(&self, queue_id: i64) -> Result<ExecutionOutcome, SearchError> {
        let queue = self
            .db
            .queues()
            .get(queue_id)
            .await?
            .ok_or(SearchError::QueueNotFound(queue_id))?;

        if !queue.is_active {
            return Err(SearchError::QueueInactive(queue_id));
        }

        let holder = Uuid::new_v4().to_string();
        let ttl = chrono::Duration::from_std(self.config.lease_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(2));
        let leases = self.db.leases();
        if !leases.try_acquire(queue_id, &holder, ttl, Utc::now()).await? {
            debug!(queue_id, "Queue lease held elsewhere");
            return Err(SearchError::QueueBusy(queue_id));
        }

        let result = self.run_leased(&queue).await;

        if let Err(e) = leases.release(queue_id, &holder).await {
            warn!(queue_id, error = %e, "Failed to release queue lease; it will expire");
        }

        result
    }

    async fn run_leased(&self, queue: &SearchQueueRecord) -> Result<ExecutionOutcome, SearchError> {
        let started = Utc::now();
        self.db.queues().mark_in_progress(queue.id, started).await?;

        match self.run_in_progress(queue, started).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.abandon_run(queue.id, &e).await;
                Err(e)
            }
        }
    }

    /// Best-effort cleanup after bookkeeping failed mid-run
    async fn abandon_run(&self, queue_id: i64, cause: &SearchError) {
        error!(queue_id, error = %cause, "Search run bookkeeping failed");
        let message = format!("search run interrupted: {}", cause);
        let now = Utc::now();

        if let Err(e) = self.db.queues().abandon_in_progress(queue_id, now, &message).await {
            warn!(queue_id, error = %e, "Failed to reset queue status");
        }
        if let Err(e) = self.db.history().abandon_open(queue_id, &message, now).await {
            warn!(queue_id, error = %e, "Failed to close open history rows");
        }
    }

    async fn run_in_progress(
        &self,
        queue: &SearchQueueRecord,
        started: DateTime<Utc>,
    ) -> Result<ExecutionOutcome, SearchError> {
        let queues = self.db.queues();
        let history = self.db.history();

        let history_id = history
            .start(queue.id, queue.instance_id, queue.user_id, &queue.strategy, started)
            .await?;

        info!(queue_id = queue.id, queue = %queue.name, strategy = %queue.strategy, history_id, "Search run started");

        let mut report = RunReport::default();
        if let Err(e) = self.search(queue, &mut report).await {
            warn!(queue_id = queue.id, error = %e, "Search run aborted");
            report.error = Some(e.to_string());
            report.aborted = true;
        }

        let finished = Utc::now();
        let duration_ms = (finished - started).num_milliseconds().max(0);
        let status = report.status();
        let mut error = report.error.clone();
        let mut is_active = true;
        let mut next_run = None;
        let mut failure = None;

        match status {
            HistoryStatus::Success | HistoryStatus::PartialSuccess => {
                next_run = queue.next_run_after(finished);
                queues
                    .mark_completed(queue.id, finished, next_run, error.as_deref())
                    .await?;
            }
            HistoryStatus::Failed => {
                let message = error.clone().unwrap_or_else(|| "search run failed".to_string());
                let update = queues.record_failure(queue.id, finished, &message).await?;
                is_active = update.is_active;
                let mut deactivated = false;

                if update.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    let text = format!(
                        "Queue deactivated after {} consecutive failures: {}",
                        update.consecutive_failures, message
                    );
                    queues.deactivate(queue.id, finished, &text).await?;
                    error!(queue_id = queue.id, failures = update.consecutive_failures, "Queue deactivated");
                    is_active = false;
                    deactivated = true;
                    error = Some(text);
                } else if update.is_active && update.is_recurring {
                    next_run = update
                        .interval_hours
                        .filter(|h| *h > 0)
                        .map(|h| finished + chrono::Duration::hours(h));
                    queues.set_next_run(queue.id, next_run).await?;
                }

                failure = Some(QueueFailure {
                    queue_id: queue.id,
                    queue_name: queue.name.clone(),
                    user_id: queue.user_id,
                    error: error.clone().unwrap_or_default(),
                    consecutive_failures: update.consecutive_failures,
                    deactivated,
                });
            }
        }

        history
            .finish(history_id, status, &report.counts, error.as_deref(), finished, duration_ms)
            .await?;

        info!(
            queue_id = queue.id,
            status = %status,
            items_found = report.counts.items_found,
            items_searched = report.counts.items_searched,
            searches_triggered = report.counts.searches_triggered,
            duration_ms,
            "Search run finished"
        );

        self.notifications
            .search_summary(SearchSummary {
                queue_id: queue.id,
                queue_name: queue.name.clone(),
                user_id: queue.user_id,
                instance_id: queue.instance_id,
                history_id,
                status,
                items_found: report.counts.items_found,
                items_searched: report.counts.items_searched,
                searches_triggered: report.counts.searches_triggered,
                duration_ms,
                error: error.clone(),
            })
            .await;
        if let Some(failure) = failure {
            self.notifications.queue_failed(failure).await;
        }

        Ok(ExecutionOutcome {
            queue_id: queue.id,
            history_id,
            status,
            items_found: report.counts.items_found,
            items_searched: report.counts.items_searched,
            searches_triggered: report.counts.searches_triggered,
            next_run,
            is_active,
            error,
        })
    }

    /// The search itself. Errors returned here abort the run.
    async fn search(&self, queue: &SearchQueueRecord, report: &mut RunReport) -> Result<(), SearchError> {
        let instance = self
            .db
            .instances()
            .get(queue.instance_id)
            .await?
            .ok_or(SearchError::InstanceNotFound(queue.instance_id))?;
        let kind = instance.kind()?;
        let api_key = self
            .encryption
            .decrypt(&instance.encrypted_api_key, &instance.api_key_nonce)
            .map_err(|e| SearchError::Decryption(e.to_string()))?;
        let client = self.clients.create(kind, &instance.url, &api_key)?;

        let limit = self
            .budget
            .get_effective_limit(instance.id, queue.user_id, instance.rate_limit_per_second, &instance.url)
            .await;
        let cap = limit.admission_cap(queue.max_items());
        report.counts.max_items = Some(cap as i64);
        report.counts.limit_source = Some(limit.source.as_str().to_string());

        let now = Utc::now();
        let query = WantedQuery::for_queue(queue, self.config.page_size);
        let candidates = self
            .collect_wanted(client.as_ref(), &query, instance.id, limit.rate_per_second, now)
            .await?;
        report.counts.items_found = candidates.len() as i64;

        let excluded = self
            .db
            .exclusions()
            .active_keys_at(queue.user_id, instance.id, now)
            .await?;
        let mirror = self.db.library_items().map_for_instance(instance.id).await?;

        let mode = queue.cooldown_mode();
        let hours = match mode {
            CooldownMode::Flat if queue.cooldown_hours <= 0.0 => self.config.default_cooldown_hours,
            _ => queue.cooldown_hours,
        };
        let strategy = queue.strategy();

        let mut ranked: Vec<(f64, WantedItem)> = candidates
            .into_iter()
            .filter_map(|item| {
                let key = item.key();
                if excluded.contains(&key) {
                    return None;
                }
                let record = mirror.get(&key);
                if is_in_cooldown_at(&item, record, mode, hours, now) {
                    return None;
                }
                let score = compute_score_at(record, &item, strategy, now);
                Some((score.score, item))
            })
            .collect();

        let eligible = ranked.len();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        ranked.truncate(cap);
        report.counts.items_searched = ranked.len() as i64;

        debug!(
            queue_id = queue.id,
            found = report.counts.items_found,
            eligible,
            cap,
            selected = ranked.len(),
            "Candidates selected"
        );

        let items = self.db.library_items();
        let mut recorded = HashSet::new();
        for (_, item) in &ranked {
            self.limiter.acquire(instance.id, limit.rate_per_second).await;
            match client.trigger_search(&[item.id]).await {
                Ok(command) => {
                    report.counts.searches_triggered += 1;
                    debug!(queue_id = queue.id, item_id = item.id, command_id = command.id, "Search triggered");

                    let (external_id, content_type) = item.key();
                    if recorded.insert((external_id.clone(), content_type)) {
                        items
                            .record_search(instance.id, &external_id, content_type, &item.title, Utc::now())
                            .await?;
                    }
                }
                Err(e) => {
                    warn!(queue_id = queue.id, item_id = item.id, error = %e, "Search trigger failed");
                    report.failed_triggers += 1;
                    report.error = Some(e.to_string());
                }
            }
        }

        Ok(())
    }

    /// Page through the wanted list, keeping items the queue's filters accept
    async fn collect_wanted(
        &self,
        client: &dyn MediaServerClient,
        query: &WantedQuery,
        instance_id: i64,
        rate: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<WantedItem>, SearchError> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for page in 1..=self.config.max_pages.max(1) {
            self.limiter.acquire(instance_id, rate).await;
            let wanted = retry_async(
                || client.get_wanted(query, page),
                &self.config.retry,
                "get_wanted",
                SearchError::is_transient,
            )
            .await?;

            let fetched = wanted.records.len();
            items.extend(
                wanted
                    .records
                    .into_iter()
                    .filter(|item| query.accepts(item, now))
                    .filter(|item| seen.insert(item.id)),
            );

            let exhausted = u64::from(page) * u64::from(query.page_size) >= wanted.total;
            if fetched == 0 || exhausted {
                break;
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl QueueRunner for SearchEngine {
    async fn run_queue(&self, queue_id: i64) -> Result<ExecutionOutcome, SearchError> {
        self.execute_queue(queue_id).await
    }
}
