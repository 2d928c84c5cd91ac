//! Notification service for run summaries and health transitions
//!
//! Events are broadcast to in-process subscribers and delivered to every
//! registered sink. Delivery is best-effort: each sink call is bounded by a
//! timeout, and failures are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::db::HistoryStatus;

/// Outcome of one queue execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSummary {
    pub queue_id: i64,
    pub queue_name: String,
    pub user_id: i64,
    pub instance_id: i64,
    pub history_id: i64,
    pub status: HistoryStatus,
    pub items_found: i64,
    pub items_searched: i64,
    pub searches_triggered: i64,
    pub duration_ms: i64,
    pub error: Option<String>,
}

/// A run that ended in failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueFailure {
    pub queue_id: i64,
    pub queue_name: String,
    pub user_id: i64,
    pub error: String,
    pub consecutive_failures: i64,
    pub deactivated: bool,
}

/// An instance going down or coming back
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStatusChange {
    pub instance_id: i64,
    pub instance_name: String,
    pub user_id: i64,
    pub healthy: bool,
    pub error: Option<String>,
    /// Queues paused (down) or resumed (up) by this transition
    pub queue_ids: Vec<i64>,
}

/// Event broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    SearchSummary(SearchSummary),
    QueueFailed(QueueFailure),
    InstanceStatus(InstanceStatusChange),
}

/// Delivery target for notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send_search_summary(&self, summary: &SearchSummary) -> Result<()>;

    async fn send_queue_failed(&self, failure: &QueueFailure) -> Result<()>;

    async fn send_instance_status(&self, change: &InstanceStatusChange) -> Result<()>;
}

/// Notification service configuration
#[derive(Debug, Clone)]
pub struct NotificationServiceConfig {
    /// Broadcast channel capacity
    pub channel_capacity: usize,
    /// Upper bound for a single sink call
    pub sink_timeout: Duration,
}

impl Default for NotificationServiceConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            sink_timeout: Duration::from_secs(10),
        }
    }
}

/// Fans notifications out to sinks and subscribers
pub struct NotificationService {
    sinks: Vec<Arc<dyn NotificationSink>>,
    event_tx: broadcast::Sender<NotificationEvent>,
    sink_timeout: Duration,
}

impl NotificationService {
    pub fn new(config: NotificationServiceConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sinks: Vec::new(),
            event_tx,
            sink_timeout: config.sink_timeout,
        }
    }

    /// Create with default configuration and no sinks
    pub fn with_defaults() -> Self {
        Self::new(NotificationServiceConfig::default())
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Subscribe to notification events
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.event_tx.subscribe()
    }

    pub async fn search_summary(&self, summary: SearchSummary) {
        for sink in &self.sinks {
            self.deliver(sink.name(), sink.send_search_summary(&summary)).await;
        }
        self.broadcast(NotificationEvent::SearchSummary(summary));
    }

    pub async fn queue_failed(&self, failure: QueueFailure) {
        for sink in &self.sinks {
            self.deliver(sink.name(), sink.send_queue_failed(&failure)).await;
        }
        self.broadcast(NotificationEvent::QueueFailed(failure));
    }

    pub async fn instance_status(&self, change: InstanceStatusChange) {
        for sink in &self.sinks {
            self.deliver(sink.name(), sink.send_instance_status(&change)).await;
        }
        self.broadcast(NotificationEvent::InstanceStatus(change));
    }

    async fn deliver<F>(&self, sink: &str, send: F)
    where
        F: std::future::Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.sink_timeout, send).await {
            Ok(Ok(())) => debug!(sink, "Notification delivered"),
            Ok(Err(e)) => warn!(sink, error = %e, "Notification sink failed"),
            Err(_) => warn!(sink, timeout_ms = self.sink_timeout.as_millis() as u64, "Notification sink timed out"),
        }
    }

    fn broadcast(&self, event: NotificationEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_search_summary(&self, s: &SearchSummary) -> Result<()> {
        info!(
            queue_id = s.queue_id,
            queue = %s.queue_name,
            status = %s.status,
            items_found = s.items_found,
            items_searched = s.items_searched,
            searches_triggered = s.searches_triggered,
            duration_ms = s.duration_ms,
            "Search run finished"
        );
        Ok(())
    }

    async fn send_queue_failed(&self, f: &QueueFailure) -> Result<()> {
        warn!(
            queue_id = f.queue_id,
            queue = %f.queue_name,
            consecutive_failures = f.consecutive_failures,
            deactivated = f.deactivated,
            error = %f.error,
            "Search queue failed"
        );
        Ok(())
    }

    async fn send_instance_status(&self, c: &InstanceStatusChange) -> Result<()> {
        if c.healthy {
            info!(instance_id = c.instance_id, instance = %c.instance_name, resumed = c.queue_ids.len(), "Instance recovered");
        } else {
            warn!(
                instance_id = c.instance_id,
                instance = %c.instance_name,
                paused = c.queue_ids.len(),
                error = c.error.as_deref().unwrap_or(""),
                "Instance unhealthy"
            );
        }
        Ok(())
    }
}

/// POSTs each event as JSON to a webhook
pub struct WebhookNotificationSink {
    client: Client,
    url: String,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, event: NotificationEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&event)
            .send()
            .await
            .context("Webhook request failed")?
            .error_for_status()
            .context("Webhook rejected notification")?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send_search_summary(&self, summary: &SearchSummary) -> Result<()> {
        self.post(NotificationEvent::SearchSummary(summary.clone())).await
    }

    async fn send_queue_failed(&self, failure: &QueueFailure) -> Result<()> {
        self.post(NotificationEvent::QueueFailed(failure.clone())).await
    }

    async fn send_instance_status(&self, change: &InstanceStatusChange) -> Result<()> {
        self.post(NotificationEvent::InstanceStatus(change.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send_search_summary(&self, _: &SearchSummary) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("smtp down")
        }

        async fn send_queue_failed(&self, _: &QueueFailure) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn send_instance_status(&self, _: &InstanceStatusChange) -> Result<()> {
            Ok(())
        }
    }

    fn summary() -> SearchSummary {
        SearchSummary {
            queue_id: 1,
            queue_name: "Missing episodes".into(),
            user_id: 1,
            instance_id: 1,
            history_id: 1,
            status: HistoryStatus::Success,
            items_found: 3,
            items_searched: 2,
            searches_triggered: 2,
            duration_ms: 10,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_sink_errors_are_swallowed_and_event_broadcast() {
        let sink = Arc::new(FailingSink {
            calls: AtomicUsize::new(0),
        });
        let service = NotificationService::new(NotificationServiceConfig {
            channel_capacity: 8,
            sink_timeout: Duration::from_millis(20),
        })
        .with_sink(sink.clone())
        .with_sink(Arc::new(LogNotificationSink));
        let mut rx = service.subscribe();

        service.search_summary(summary()).await;
        service
            .queue_failed(QueueFailure {
                queue_id: 1,
                queue_name: "q".into(),
                user_id: 1,
                error: "boom".into(),
                consecutive_failures: 1,
                deactivated: false,
            })
            .await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert_eq!(rx.recv().await.unwrap(), NotificationEvent::SearchSummary(summary()));
        assert!(matches!(rx.recv().await.unwrap(), NotificationEvent::QueueFailed(_)));
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(NotificationEvent::SearchSummary(summary())).unwrap();
        assert_eq!(json["type"], "search_summary");
        assert_eq!(json["status"], "success");
        assert_eq!(json["items_searched"], 2);
    }
}
