//! Queue timer scheduler
//!
//! One timer per schedulable queue, keyed by queue id, plus a fixed-interval
//! health sweep. The scheduler runs as a single task that owns all timer
//! state; callers talk to it through a cloneable [`SchedulerHandle`].
//!
//! Fired executions run on their own tasks and report back through an event
//! channel, so a slow or panicking execution never blocks the loop.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::SearchError;
use crate::services::engine::ExecutionOutcome;
use crate::services::health::HealthReport;

/// Upper bound on a single sleep so the loop re-evaluates periodically
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Executes one queue; implemented by the search engine
#[async_trait]
pub trait QueueRunner: Send + Sync {
    async fn run_queue(&self, queue_id: i64) -> Result<ExecutionOutcome, SearchError>;
}

/// Runs one health sweep; implemented by the health monitor
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check_all(&self) -> Result<HealthReport, SearchError>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between health sweeps
    pub health_check_interval: Duration,
    /// Run a health sweep right after start instead of one interval later
    pub health_check_on_start: bool,
    /// Delay before a queue that found its lease taken is tried again
    pub busy_retry_delay: Duration,
    /// Delay before a queue whose run failed outside the engine is tried again
    pub error_retry_delay: Duration,
    /// How long `stop(true)` waits for in-flight executions
    pub shutdown_timeout: Duration,
    /// Command channel capacity
    pub command_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(300),
            health_check_on_start: true,
            busy_retry_delay: Duration::from_secs(60),
            error_retry_delay: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            command_buffer: 100,
        }
    }
}

/// Snapshot of the scheduler state
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub paused: bool,
    /// Armed timers as (queue_id, fire_at), earliest first
    pub timers: Vec<(i64, DateTime<Utc>)>,
    pub running: Vec<i64>,
    pub next_health_check: Option<DateTime<Utc>>,
    pub health_check_running: bool,
}

/// Errors returned to handle callers
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is not running")]
    NotRunning,

    #[error("search queue {0} not found")]
    QueueNotFound(i64),

    #[error("search queue {0} is already running")]
    AlreadyRunning(i64),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

enum SchedulerCommand {
    Schedule {
        queue_id: i64,
        reschedule: bool,
        response: oneshot::Sender<Result<bool, SchedulerError>>,
    },
    Unschedule {
        queue_id: i64,
        response: oneshot::Sender<bool>,
    },
    TriggerNow {
        queue_id: i64,
        response: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Pause {
        response: oneshot::Sender<()>,
    },
    Resume {
        response: oneshot::Sender<()>,
    },
    Status {
        response: oneshot::Sender<SchedulerStatus>,
    },
    Stop {
        wait: bool,
        response: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
enum SchedulerEvent {
    JobCompleted {
        queue_id: i64,
        next_fire_at: Option<DateTime<Utc>>,
    },
    HealthCheckCompleted {
        report: Option<HealthReport>,
    },
}

/// Cloneable control surface for a running [`SearchScheduler`]
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    shutdown: CancellationToken,
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> Result<T, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| SchedulerError::NotRunning)?;
        rx.await.map_err(|_| SchedulerError::NotRunning)
    }

    /// Arm the queue's timer from its stored `next_run`.
    ///
    /// Returns `false` when the queue is not schedulable (its timer, if any,
    /// is removed). With `reschedule` false an existing timer is kept.
    pub async fn schedule_queue(&self, queue_id: i64, reschedule: bool) -> Result<bool, SchedulerError> {
        self.request(|response| SchedulerCommand::Schedule {
            queue_id,
            reschedule,
            response,
        })
        .await?
    }

    /// Remove the queue's timer. Returns whether one existed.
    pub async fn unschedule_queue(&self, queue_id: i64) -> Result<bool, SchedulerError> {
        self.request(|response| SchedulerCommand::Unschedule { queue_id, response })
            .await
    }

    /// Fire the queue immediately, ignoring its timer and the paused flag
    pub async fn trigger_now(&self, queue_id: i64) -> Result<(), SchedulerError> {
        self.request(|response| SchedulerCommand::TriggerNow { queue_id, response })
            .await?
    }

    pub async fn pause(&self) -> Result<(), SchedulerError> {
        self.request(|response| SchedulerCommand::Pause { response }).await
    }

    pub async fn resume(&self) -> Result<(), SchedulerError> {
        self.request(|response| SchedulerCommand::Resume { response }).await
    }

    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        self.request(|response| SchedulerCommand::Status { response }).await
    }

    /// Stop the scheduler. With `wait`, in-flight executions are drained
    /// (bounded by the shutdown timeout); otherwise they are aborted.
    pub async fn stop(&self, wait: bool) -> Result<(), SchedulerError> {
        self.request(|response| SchedulerCommand::Stop { wait, response })
            .await
    }

    /// Token cancelled when the scheduler should stop without draining
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

pub struct SearchScheduler {
    db: Database,
    runner: Arc<dyn QueueRunner>,
    health: Option<Arc<dyn HealthChecker>>,
    config: SchedulerConfig,

    timers: HashMap<i64, DateTime<Utc>>,
    running: HashMap<i64, JoinHandle<()>>,
    /// Running queues that were unscheduled; their completion must not re-arm
    detached: HashSet<i64>,
    health_task: Option<JoinHandle<()>>,
    next_health_at: Option<DateTime<Utc>>,
    paused: bool,

    command_rx: mpsc::Receiver<SchedulerCommand>,
    event_tx: mpsc::UnboundedSender<SchedulerEvent>,
    event_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    shutdown: CancellationToken,
}

impl SearchScheduler {
    pub fn new(
        db: Database,
        runner: Arc<dyn QueueRunner>,
        health: Option<Arc<dyn HealthChecker>>,
        config: SchedulerConfig,
    ) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let scheduler = Self {
            db,
            runner,
            health,
            config,
            timers: HashMap::new(),
            running: HashMap::new(),
            detached: HashSet::new(),
            health_task: None,
            next_health_at: None,
            paused: false,
            command_rx,
            event_tx,
            event_rx,
            shutdown: shutdown.clone(),
        };
        let handle = SchedulerHandle {
            command_tx,
            shutdown,
        };
        (scheduler, handle)
    }

    /// Spawn the loop on the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Main loop; returns after `stop` or cancellation of the shutdown token
    pub async fn run(mut self) {
        if let Err(e) = self.start().await {
            error!(error = %e, "Scheduler startup failed, no queues armed");
        }

        loop {
            let sleep_for = self.time_until_next_fire();

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    self.fire_due();
                }
                Some(command) = self.command_rx.recv() => {
                    if let Some((wait, done)) = self.handle_command(command).await {
                        self.shutdown_tasks(wait).await;
                        let _ = done.send(());
                        break;
                    }
                }
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event).await;
                }
                _ = self.shutdown.cancelled() => {
                    info!("Scheduler shutdown requested");
                    self.shutdown_tasks(false).await;
                    break;
                }
            }
        }

        info!("Scheduler stopped");
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        let now = Utc::now();
        let reconciled = self.db.queues().reconcile_stale_in_progress(now).await?;
        let purged = self.db.leases().purge_expired(now).await?;
        if reconciled > 0 || purged > 0 {
            info!(reconciled, purged, "Recovered queues left running by a previous process");
        }

        let queues = self.db.queues().list_schedulable().await?;
        for queue in &queues {
            self.arm(queue.id, queue.next_run, now);
        }

        if self.health.is_some() {
            self.next_health_at = Some(if self.config.health_check_on_start {
                now
            } else {
                now + to_chrono(self.config.health_check_interval)
            });
        }

        info!(
            queues = self.timers.len(),
            health_interval_secs = self.config.health_check_interval.as_secs(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Arm a timer; a missing or past `next_run` fires immediately
    fn arm(&mut self, queue_id: i64, next_run: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        let fire_at = match next_run {
            Some(at) if at > now => at,
            _ => now,
        };
        debug!(queue_id, fire_at = %fire_at, "Queue timer armed");
        self.timers.insert(queue_id, fire_at);
    }

    fn time_until_next_fire(&self) -> Duration {
        if self.paused {
            return MAX_IDLE;
        }

        let next_queue = self
            .timers
            .iter()
            .filter(|(id, _)| !self.running.contains_key(*id))
            .map(|(_, at)| *at)
            .min();
        let next_health = self.next_health_at.filter(|_| self.health_task.is_none());

        let next = match (next_queue, next_health) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        match next {
            Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO).min(MAX_IDLE),
            None => MAX_IDLE,
        }
    }

    fn fire_due(&mut self) {
        if self.paused {
            return;
        }
        let now = Utc::now();

        let due: Vec<i64> = self
            .timers
            .iter()
            .filter(|(id, at)| **at <= now && !self.running.contains_key(*id))
            .map(|(id, _)| *id)
            .collect();
        for queue_id in due {
            self.timers.remove(&queue_id);
            self.spawn_run(queue_id);
        }

        if let Some(at) = self.next_health_at {
            if at <= now && self.health_task.is_none() {
                self.spawn_health_check();
                self.next_health_at = Some(now + to_chrono(self.config.health_check_interval));
            }
        }
    }

    fn spawn_run(&mut self, queue_id: i64) {
        let runner = Arc::clone(&self.runner);
        let db = self.db.clone();
        let events = self.event_tx.clone();
        let busy_delay = to_chrono(self.config.busy_retry_delay);
        let error_delay = to_chrono(self.config.error_retry_delay);

        debug!(queue_id, "Firing queue");
        let handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(runner.run_queue(queue_id))
                .catch_unwind()
                .await;

            let next_fire_at = match result {
                Ok(Ok(outcome)) => {
                    if outcome.is_active {
                        outcome.next_run
                    } else {
                        None
                    }
                }
                Ok(Err(SearchError::QueueBusy(_))) => {
                    debug!(queue_id, "Queue lease held elsewhere, retrying later");
                    retry_if_schedulable(&db, queue_id, Utc::now() + busy_delay).await
                }
                Ok(Err(e)) if e.is_admission() => {
                    info!(queue_id, reason = %e, "Queue no longer runnable, timer removed");
                    None
                }
                Ok(Err(e)) => {
                    error!(queue_id, error = %e, "Queue execution failed");
                    retry_if_schedulable(&db, queue_id, Utc::now() + error_delay).await
                }
                Err(_) => {
                    error!(queue_id, "Queue execution panicked");
                    retry_if_schedulable(&db, queue_id, Utc::now() + error_delay).await
                }
            };

            let _ = events.send(SchedulerEvent::JobCompleted {
                queue_id,
                next_fire_at,
            });
        });

        self.running.insert(queue_id, handle);
    }

    fn spawn_health_check(&mut self) {
        let Some(health) = self.health.clone() else {
            return;
        };
        let events = self.event_tx.clone();

        self.health_task = Some(tokio::spawn(async move {
            let report = match AssertUnwindSafe(health.check_all()).catch_unwind().await {
                Ok(Ok(report)) => Some(report),
                Ok(Err(e)) => {
                    error!(error = %e, "Health sweep failed");
                    None
                }
                Err(_) => {
                    error!("Health sweep panicked");
                    None
                }
            };
            let _ = events.send(SchedulerEvent::HealthCheckCompleted { report });
        }));
    }

    /// Returns `Some((wait, response))` when the loop should stop
    async fn handle_command(&mut self, command: SchedulerCommand) -> Option<(bool, oneshot::Sender<()>)> {
        match command {
            SchedulerCommand::Schedule {
                queue_id,
                reschedule,
                response,
            } => {
                let result = self.schedule(queue_id, reschedule).await;
                let _ = response.send(result);
            }
            SchedulerCommand::Unschedule { queue_id, response } => {
                let _ = response.send(self.unschedule(queue_id));
            }
            SchedulerCommand::TriggerNow { queue_id, response } => {
                let result = self.trigger_now(queue_id).await;
                let _ = response.send(result);
            }
            SchedulerCommand::Pause { response } => {
                if !self.paused {
                    info!(timers = self.timers.len(), "Scheduler paused");
                }
                self.paused = true;
                let _ = response.send(());
            }
            SchedulerCommand::Resume { response } => {
                if self.paused {
                    info!(timers = self.timers.len(), "Scheduler resumed");
                }
                self.paused = false;
                let _ = response.send(());
            }
            SchedulerCommand::Status { response } => {
                let _ = response.send(self.status());
            }
            SchedulerCommand::Stop { wait, response } => return Some((wait, response)),
        }
        None
    }

    async fn schedule(&mut self, queue_id: i64, reschedule: bool) -> Result<bool, SchedulerError> {
        let Some(queue) = self.db.queues().get(queue_id).await? else {
            self.unschedule(queue_id);
            return Ok(false);
        };

        if !queue.is_schedulable() {
            self.unschedule(queue_id);
            return Ok(false);
        }

        self.detached.remove(&queue_id);
        if self.running.contains_key(&queue_id) {
            // The completion event arms the next timer
            return Ok(true);
        }
        if reschedule || !self.timers.contains_key(&queue_id) {
            self.arm(queue_id, queue.next_run, Utc::now());
        }
        Ok(true)
    }

    fn unschedule(&mut self, queue_id: i64) -> bool {
        if self.running.contains_key(&queue_id) {
            self.detached.insert(queue_id);
        }
        let existed = self.timers.remove(&queue_id).is_some();
        if existed {
            debug!(queue_id, "Queue timer removed");
        }
        existed
    }

    async fn trigger_now(&mut self, queue_id: i64) -> Result<(), SchedulerError> {
        if self.running.contains_key(&queue_id) {
            return Err(SchedulerError::AlreadyRunning(queue_id));
        }
        if self.db.queues().get(queue_id).await?.is_none() {
            return Err(SchedulerError::QueueNotFound(queue_id));
        }
        info!(queue_id, "Queue triggered manually");
        self.timers.remove(&queue_id);
        self.detached.remove(&queue_id);
        self.spawn_run(queue_id);
        Ok(())
    }

    fn status(&self) -> SchedulerStatus {
        let mut timers: Vec<(i64, DateTime<Utc>)> =
            self.timers.iter().map(|(id, at)| (*id, *at)).collect();
        timers.sort_by_key(|(id, at)| (*at, *id));
        let mut running: Vec<i64> = self.running.keys().copied().collect();
        running.sort_unstable();

        SchedulerStatus {
            paused: self.paused,
            timers,
            running,
            next_health_check: self.next_health_at,
            health_check_running: self.health_task.is_some(),
        }
    }

    async fn handle_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::JobCompleted {
                queue_id,
                next_fire_at,
            } => {
                self.running.remove(&queue_id);
                if self.detached.remove(&queue_id) {
                    return;
                }
                match next_fire_at {
                    Some(at) => self.arm(queue_id, Some(at), Utc::now()),
                    None => {
                        self.timers.remove(&queue_id);
                    }
                }
            }
            SchedulerEvent::HealthCheckCompleted { report } => {
                self.health_task = None;
                let Some(report) = report else {
                    return;
                };

                for queue_id in &report.queues_paused {
                    self.unschedule(*queue_id);
                }
                for queue_id in &report.queues_resumed {
                    if let Err(e) = self.schedule(*queue_id, true).await {
                        warn!(queue_id, error = %e, "Failed to re-arm resumed queue");
                    }
                }
            }
        }
    }

    async fn shutdown_tasks(&mut self, wait: bool) {
        let mut handles: Vec<JoinHandle<()>> = self.running.drain().map(|(_, h)| h).collect();
        handles.extend(self.health_task.take());

        if handles.is_empty() {
            return;
        }

        if wait {
            info!(in_flight = handles.len(), "Waiting for in-flight executions");
            let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
            let drain = futures::future::join_all(handles);
            if tokio::time::timeout(self.config.shutdown_timeout, drain).await.is_err() {
                warn!(
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Timed out waiting for in-flight executions, aborting the rest"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        } else {
            warn!(in_flight = handles.len(), "Aborting in-flight executions");
            for handle in handles {
                handle.abort();
            }
        }
    }
}

/// Re-arm at `at` only while the queue is still schedulable
async fn retry_if_schedulable(db: &Database, queue_id: i64, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match db.queues().get(queue_id).await {
        Ok(Some(queue)) if queue.is_schedulable() => {
            Some(queue.next_run.map_or(at, |next| next.max(at)))
        }
        Ok(_) => None,
        // Storage unavailable; try again rather than silently dropping the queue
        Err(_) => Some(at),
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CreateInstance, CreateSearchQueue, HistoryStatus, InstanceKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueueRunner for CountingRunner {
        async fn run_queue(&self, queue_id: i64) -> Result<ExecutionOutcome, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExecutionOutcome {
                queue_id,
                history_id: 1,
                status: HistoryStatus::Success,
                items_found: 0,
                items_searched: 0,
                searches_triggered: 0,
                next_run: None,
                is_active: true,
                error: None,
            })
        }
    }

    struct PanickingRunner;

    #[async_trait]
    impl QueueRunner for PanickingRunner {
        async fn run_queue(&self, _queue_id: i64) -> Result<ExecutionOutcome, SearchError> {
            panic!("runner exploded");
        }
    }

    /// Runs until aborted; flags when its future is dropped
    struct HangingRunner {
        dropped: Arc<std::sync::atomic::AtomicBool>,
    }

    struct DropFlag(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl QueueRunner for HangingRunner {
        async fn run_queue(&self, _queue_id: i64) -> Result<ExecutionOutcome, SearchError> {
            let _flag = DropFlag(self.dropped.clone());
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(SearchError::QueueBusy(0))
        }
    }

    async fn seeded_db() -> (Database, i64) {
        let db = Database::in_memory().await.unwrap();
        let instance = db
            .instances()
            .create(CreateInstance::new(1, "sonarr", InstanceKind::Sonarr, "http://sonarr:8989"))
            .await
            .unwrap();
        let mut data = CreateSearchQueue::new(1, instance.id, "missing");
        data.next_run = Some(Utc::now() + chrono::Duration::hours(1));
        let queue = db.queues().create(data).await.unwrap();
        (db, queue.id)
    }

    fn quiet_config() -> SchedulerConfig {
        SchedulerConfig {
            health_check_on_start: false,
            busy_retry_delay: Duration::from_millis(50),
            error_retry_delay: Duration::from_secs(3600),
            ..SchedulerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_arms_future_timer_without_firing() {
        let (db, queue_id) = seeded_db().await;
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
        });
        let (scheduler, handle) = SearchScheduler::new(db, runner.clone(), None, quiet_config());
        let task = scheduler.spawn();

        let status = handle.status().await.unwrap();
        assert_eq!(status.timers.len(), 1);
        assert_eq!(status.timers[0].0, queue_id);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);

        assert!(handle.unschedule_queue(queue_id).await.unwrap());
        assert!(!handle.unschedule_queue(queue_id).await.unwrap());

        handle.stop(true).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_run_is_isolated() {
        let (db, queue_id) = seeded_db().await;
        let (scheduler, handle) =
            SearchScheduler::new(db, Arc::new(PanickingRunner), None, quiet_config());
        let task = scheduler.spawn();

        handle.trigger_now(queue_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Loop survives and re-arms on the error delay
        let status = handle.status().await.unwrap();
        assert!(status.running.is_empty());
        assert_eq!(status.timers.len(), 1);

        handle.stop(false).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_draining_stop_aborts_runs_past_timeout() {
        let (db, queue_id) = seeded_db().await;
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let runner = Arc::new(HangingRunner {
            dropped: dropped.clone(),
        });
        let config = SchedulerConfig {
            shutdown_timeout: Duration::from_millis(100),
            ..quiet_config()
        };
        let (scheduler, handle) = SearchScheduler::new(db, runner, None, config);
        let task = scheduler.spawn();
        let shutdown = handle.shutdown_token();

        handle.trigger_now(queue_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status().await.unwrap().running, vec![queue_id]);

        let started = std::time::Instant::now();
        handle.stop(true).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        task.await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(dropped.load(Ordering::SeqCst), "in-flight run kept going after stop");
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_trigger_unknown_queue() {
        let (db, _) = seeded_db().await;
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
        });
        let (scheduler, handle) = SearchScheduler::new(db, runner, None, quiet_config());
        let task = scheduler.spawn();

        assert!(matches!(
            handle.trigger_now(9999).await,
            Err(SchedulerError::QueueNotFound(9999))
        ));

        handle.shutdown_token().cancel();
        task.await.unwrap();
        assert!(matches!(handle.status().await, Err(SchedulerError::NotRunning)));
    }
}
