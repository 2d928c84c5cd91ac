//! Scheduler driving the real engine and health monitor

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;

use common::{Harness, episodes, eventually};
use seeker::jobs::{HealthChecker, SchedulerConfig, SearchScheduler};

fn config(health_on_start: bool) -> SchedulerConfig {
    SchedulerConfig {
        health_check_interval: Duration::from_secs(3600),
        health_check_on_start: health_on_start,
        busy_retry_delay: Duration::from_millis(50),
        ..SchedulerConfig::default()
    }
}

#[tokio::test]
async fn test_due_queue_fires_on_start_and_rearms() {
    let h = Harness::new(episodes(2)).await;
    let queue = h
        .create_queue(|q| {
            q.is_recurring = true;
            q.interval_hours = Some(2);
        })
        .await;

    let (scheduler, handle) = SearchScheduler::new(h.db.clone(), h.engine.clone(), None, config(false));
    let task = scheduler.spawn();

    let db = h.db.clone();
    let queue_id = queue.id;
    let ran = eventually(Duration::from_secs(5), || {
        let db = db.clone();
        async move { !db.history().list_for_queue(queue_id, 10).await.unwrap().is_empty() }
    })
    .await;
    assert!(ran);

    let rearmed = eventually(Duration::from_secs(5), || {
        let handle = handle.clone();
        async move {
            let status = handle.status().await.unwrap();
            status.running.is_empty() && status.timers.len() == 1
        }
    })
    .await;
    assert!(rearmed);

    let status = handle.status().await.unwrap();
    assert_eq!(status.timers[0].0, queue.id);
    assert!(status.timers[0].1 > Utc::now() + chrono::Duration::minutes(110));
    assert_eq!(h.client.triggered().len(), 2);

    handle.stop(true).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_paused_scheduler_keeps_timers_without_firing() {
    let h = Harness::new(episodes(1)).await;
    let (scheduler, handle) = SearchScheduler::new(h.db.clone(), h.engine.clone(), None, config(false));
    let task = scheduler.spawn();

    handle.pause().await.unwrap();
    let queue = h.create_queue(|_| {}).await;
    assert!(handle.schedule_queue(queue.id, false).await.unwrap());

    tokio::time::sleep(Duration::from_millis(150)).await;
    let status = handle.status().await.unwrap();
    assert!(status.paused);
    assert_eq!(status.timers.len(), 1);
    assert!(h.client.triggered().is_empty());

    handle.resume().await.unwrap();
    let client = h.client.clone();
    let fired = eventually(Duration::from_secs(5), || {
        let client = client.clone();
        async move { client.triggered().len() == 1 }
    })
    .await;
    assert!(fired);

    // A finished one-shot queue is not re-armed
    let dropped = eventually(Duration::from_secs(5), || {
        let handle = handle.clone();
        async move { handle.status().await.unwrap().timers.is_empty() }
    })
    .await;
    assert!(dropped);

    handle.stop(true).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_inactive_queue_is_not_scheduled() {
    let h = Harness::new(vec![]).await;
    let queue = h.create_queue(|q| q.next_run = Some(Utc::now() + chrono::Duration::hours(1))).await;
    let (scheduler, handle) = SearchScheduler::new(h.db.clone(), h.engine.clone(), None, config(false));
    let task = scheduler.spawn();

    assert_eq!(handle.status().await.unwrap().timers.len(), 1);

    h.db.queues().pause(queue.id, "paused by user").await.unwrap();
    assert!(!handle.schedule_queue(queue.id, true).await.unwrap());
    assert!(handle.status().await.unwrap().timers.is_empty());

    handle.stop(false).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_health_sweep_unschedules_paused_queues() {
    let h = Harness::new(vec![]).await;
    let queue = h
        .create_queue(|q| {
            q.is_recurring = true;
            q.interval_hours = Some(1);
            q.next_run = Some(Utc::now() + chrono::Duration::hours(1));
        })
        .await;
    h.client.set_reachable(false);

    let health: Arc<dyn HealthChecker> = h.health.clone();
    let (scheduler, handle) =
        SearchScheduler::new(h.db.clone(), h.engine.clone(), Some(health), config(true));
    let task = scheduler.spawn();

    let unscheduled = eventually(Duration::from_secs(5), || {
        let handle = handle.clone();
        async move {
            let status = handle.status().await.unwrap();
            !status.health_check_running && status.timers.is_empty()
        }
    })
    .await;
    assert!(unscheduled);
    assert!(!h.queue(queue.id).await.is_active);

    handle.stop(true).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_startup_reconciles_stale_runs() {
    let h = Harness::new(vec![]).await;
    let queue = h.create_queue(|q| q.next_run = Some(Utc::now() + chrono::Duration::hours(1))).await;
    h.db.queues().mark_in_progress(queue.id, Utc::now()).await.unwrap();

    let (scheduler, handle) = SearchScheduler::new(h.db.clone(), h.engine.clone(), None, config(false));
    let task = scheduler.spawn();

    let status = handle.status().await.unwrap();
    assert_eq!(status.timers.len(), 1);
    assert_eq!(h.queue(queue.id).await.status(), seeker::db::QueueStatus::Pending);

    handle.stop(true).await.unwrap();
    task.await.unwrap();
}
