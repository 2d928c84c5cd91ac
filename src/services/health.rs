//! Instance health monitor
//!
//! A circuit breaker with asymmetric hysteresis: the first failed probe after
//! a healthy period pauses every active queue on the instance, while resuming
//! needs `recovery_threshold` consecutive successful probes. Only queues
//! paused with [`HEALTH_PAUSE_REASON`] are ever resumed here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::{Database, InstanceRecord};
use crate::error::SearchError;
use crate::jobs::scheduler::HealthChecker;
use crate::services::encryption::CredentialEncryption;
use crate::services::media::{ConnectionTest, MediaClientFactory};
use crate::services::notifications::{InstanceStatusChange, NotificationService};

/// Pause reason written by the health monitor; resumption matches it exactly
pub const HEALTH_PAUSE_REASON: &str = "auto-paused: instance unhealthy";

/// Health monitor configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive successful probes needed before paused queues resume
    pub recovery_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            recovery_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTransition {
    Down,
    Up,
}

/// Result of probing one instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceHealthResult {
    pub instance_id: i64,
    pub instance_name: String,
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub version: Option<String>,
    pub error: Option<String>,
    pub consecutive_failures: i64,
    pub consecutive_successes: i64,
    pub transition: Option<HealthTransition>,
    pub queues_paused: Vec<i64>,
    pub queues_resumed: Vec<i64>,
}

/// Aggregate of one sweep over all active instances
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub results: Vec<InstanceHealthResult>,
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// Instances whose check itself failed (storage errors)
    pub errors: usize,
    pub queues_paused: Vec<i64>,
    pub queues_resumed: Vec<i64>,
}

pub struct HealthMonitor {
    db: Database,
    encryption: Arc<CredentialEncryption>,
    clients: Arc<dyn MediaClientFactory>,
    notifications: Arc<NotificationService>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(
        db: Database,
        encryption: Arc<CredentialEncryption>,
        clients: Arc<dyn MediaClientFactory>,
        notifications: Arc<NotificationService>,
        config: HealthConfig,
    ) -> Self {
        Self {
            db,
            encryption,
            clients,
            notifications,
            config,
        }
    }

    /// Probe the instance without recording anything
    async fn probe(&self, instance: &InstanceRecord) -> ConnectionTest {
        let kind = match instance.kind() {
            Ok(kind) => kind,
            Err(e) => return ConnectionTest::failed(e.to_string(), 0),
        };
        let api_key = match self
            .encryption
            .decrypt(&instance.encrypted_api_key, &instance.api_key_nonce)
        {
            Ok(key) => key,
            Err(e) => return ConnectionTest::failed(SearchError::Decryption(e.to_string()).to_string(), 0),
        };
        match self.clients.create(kind, &instance.url, &api_key) {
            Ok(client) => client.test_connection().await,
            Err(e) => ConnectionTest::failed(e.to_string(), 0),
        }
    }

    /// Probe one instance, update its streaks and apply pause/resume side effects
    pub async fn check_instance(&self, instance: &InstanceRecord) -> Result<InstanceHealthResult, SearchError> {
        let probe = self.probe(instance).await;
        let now = Utc::now();
        let instances = self.db.instances();
        let queues = self.db.queues();

        let mut result = InstanceHealthResult {
            instance_id: instance.id,
            instance_name: instance.name.clone(),
            healthy: probe.success,
            latency_ms: Some(probe.latency_ms),
            version: probe.version.clone(),
            error: probe.error.clone(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            transition: None,
            queues_paused: Vec::new(),
            queues_resumed: Vec::new(),
        };

        if probe.success {
            let streak = instances
                .mark_healthy(instance.id, probe.latency_ms as i64, now)
                .await?;
            result.consecutive_successes = streak;

            if streak >= i64::from(self.config.recovery_threshold) {
                result.queues_resumed = queues
                    .resume_paused(instance.id, HEALTH_PAUSE_REASON, now)
                    .await?;
                if streak == i64::from(self.config.recovery_threshold) {
                    result.transition = Some(HealthTransition::Up);
                }
            }
        } else {
            let error_text = probe.error.clone().unwrap_or_else(|| "connection failed".to_string());
            let streak = instances.mark_unhealthy(instance.id, &error_text, now).await?;
            result.consecutive_failures = streak;

            // Queues activated while the instance is down are held as well
            result.queues_paused = queues
                .pause_for_instance(instance.id, HEALTH_PAUSE_REASON, now)
                .await?;
            if streak == 1 {
                result.transition = Some(HealthTransition::Down);
            }
        }

        match result.transition {
            Some(HealthTransition::Down) => {
                warn!(
                    instance_id = instance.id,
                    instance = %instance.name,
                    error = result.error.as_deref().unwrap_or(""),
                    queues_paused = result.queues_paused.len(),
                    "Instance went down, pausing queues"
                );
            }
            Some(HealthTransition::Up) => {
                info!(
                    instance_id = instance.id,
                    instance = %instance.name,
                    queues_resumed = result.queues_resumed.len(),
                    "Instance recovered, resuming queues"
                );
            }
            None => {}
        }

        if let Some(transition) = result.transition {
            let queue_ids = match transition {
                HealthTransition::Down => result.queues_paused.clone(),
                HealthTransition::Up => result.queues_resumed.clone(),
            };
            self.notifications
                .instance_status(InstanceStatusChange {
                    instance_id: instance.id,
                    instance_name: instance.name.clone(),
                    user_id: instance.user_id,
                    healthy: transition == HealthTransition::Up,
                    error: result.error.clone(),
                    queue_ids,
                })
                .await;
        }

        Ok(result)
    }

    /// Probe every active instance. One instance failing never stops the sweep.
    pub async fn check_all_instances(&self) -> Result<HealthReport, SearchError> {
        let instances = self.db.instances().list_active().await?;
        let mut report = HealthReport::default();

        for instance in &instances {
            report.checked += 1;
            match self.check_instance(instance).await {
                Ok(result) => {
                    if result.healthy {
                        report.healthy += 1;
                    } else {
                        report.unhealthy += 1;
                    }
                    report.queues_paused.extend(&result.queues_paused);
                    report.queues_resumed.extend(&result.queues_resumed);
                    report.results.push(result);
                }
                Err(e) => {
                    error!(instance_id = instance.id, error = %e, "Health check failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            errors = report.errors,
            "Health sweep complete"
        );
        Ok(report)
    }
}

#[async_trait]
impl HealthChecker for HealthMonitor {
    async fn check_all(&self) -> Result<HealthReport, SearchError> {
        self.check_all_instances().await
    }
}
