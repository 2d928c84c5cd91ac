//! Seeker daemon
//!
//! Wires configuration, storage and services together and runs the queue
//! scheduler until interrupted. One-shot modes are selected on the command line.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use seeker::cli::{CliOptions, Command};
use seeker::config::Config;
use seeker::db::Database;
use seeker::jobs::{HealthChecker, SearchScheduler};
use seeker::services::{
    ArrClientFactory, BudgetResolver, CredentialEncryption, HealthMonitor, LogNotificationSink,
    NotificationService, ProwlarrClientFactory, RateLimiterRegistry, SearchEngine,
    WebhookNotificationSink, init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = CliOptions::from_args()?;

    if options.command == Command::GenerateKey {
        println!("{}", CredentialEncryption::generate_key());
        return Ok(());
    }

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(config.log_format)?;

    info!("Starting Seeker");

    let db = Database::connect_with_retry(
        &config.database_url,
        config.database_max_connections,
        Duration::from_secs(2),
        5,
    )
    .await?;
    info!("Database connected");

    let encryption = Arc::new(
        CredentialEncryption::from_base64_key(&config.encryption_key)
            .context("Invalid ENCRYPTION_KEY")?,
    );

    let clients = Arc::new(ArrClientFactory::new(config.http_timeout()));
    let budget = Arc::new(BudgetResolver::new(
        db.clone(),
        encryption.clone(),
        Arc::new(ProwlarrClientFactory::new(config.http_timeout())),
    ));
    let limiter = Arc::new(RateLimiterRegistry::new());

    let mut notifications = NotificationService::with_defaults().with_sink(Arc::new(LogNotificationSink));
    if let Some(url) = &config.notify_webhook_url {
        notifications =
            notifications.with_sink(Arc::new(WebhookNotificationSink::new(url, config.http_timeout())?));
        info!("Webhook notifications enabled");
    }
    let notifications = Arc::new(notifications);

    let engine = Arc::new(SearchEngine::new(
        db.clone(),
        encryption.clone(),
        clients.clone(),
        budget,
        limiter,
        notifications.clone(),
        config.engine_config(),
    ));
    let health = Arc::new(HealthMonitor::new(
        db.clone(),
        encryption,
        clients,
        notifications,
        config.health_config(),
    ));

    match options.command {
        Command::RunQueue(queue_id) => {
            let outcome = engine.execute_queue(queue_id).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::CheckHealth => {
            let report = health.check_all().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Daemon => {
            let (scheduler, handle) = SearchScheduler::new(
                db.clone(),
                engine,
                Some(health as Arc<dyn HealthChecker>),
                config.scheduler_config(),
            );
            let task = scheduler.spawn();
            let shutdown = handle.shutdown_token();

            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to listen for shutdown signal");
                    }
                    info!("Shutdown signal received, draining in-flight searches");
                    if let Err(e) = handle.stop(true).await {
                        warn!(error = %e, "Scheduler already stopped");
                    }
                }
                _ = shutdown.cancelled() => {}
            }
            task.await.context("Scheduler task failed")?;
        }
        Command::GenerateKey => {}
    }

    db.close().await;
    info!("Seeker stopped");
    Ok(())
}
