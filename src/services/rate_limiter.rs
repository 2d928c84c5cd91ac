//! Rate limiting and retry logic for instance API calls
//!
//! Every instance gets one token bucket shared by all queues that target it,
//! so two queues on the same Sonarr never exceed its configured rate together.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Rate used when an instance is configured with a non-positive or invalid rate
pub const DEFAULT_RATE_PER_SECOND: f64 = 0.5;

/// Slowest pace a bucket is built with, however small the configured rate
const MAX_TOKEN_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

struct Bucket {
    rate: f64,
    limiter: Arc<DirectLimiter>,
}

/// Registry of per-instance token buckets
#[derive(Default)]
pub struct RateLimiterRegistry {
    buckets: Mutex<HashMap<i64, Bucket>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bucket for an instance, rebuilt when its configured rate changed
    fn limiter_for(&self, instance_id: i64, rate_per_second: f64) -> Arc<DirectLimiter> {
        let rate = sanitize_rate(rate_per_second);
        let mut buckets = self.buckets.lock();

        if let Some(bucket) = buckets.get(&instance_id) {
            if (bucket.rate - rate).abs() < f64::EPSILON {
                return Arc::clone(&bucket.limiter);
            }
            debug!(instance_id, old_rate = bucket.rate, new_rate = rate, "Instance rate changed, rebuilding limiter");
        }

        let limiter = Arc::new(RateLimiter::direct(quota_for(rate)));
        buckets.insert(
            instance_id,
            Bucket {
                rate,
                limiter: Arc::clone(&limiter),
            },
        );
        limiter
    }

    /// Wait until the instance's bucket grants one request
    pub async fn acquire(&self, instance_id: i64, rate_per_second: f64) {
        let limiter = self.limiter_for(instance_id, rate_per_second);
        limiter.until_ready().await;
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }
}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        DEFAULT_RATE_PER_SECOND
    }
}

/// One token per `1 / rate` seconds, no burst. Fractional rates are supported.
fn quota_for(rate: f64) -> Quota {
    let period = Duration::try_from_secs_f64(1.0 / rate)
        .unwrap_or(MAX_TOKEN_PERIOD)
        .clamp(Duration::from_nanos(1), MAX_TOKEN_PERIOD);
    Quota::with_period(period).unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create an ExponentialBackoff from this config
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        }
    }
}

/// Execute an async operation, retrying errors for which `should_retry` holds
pub async fn retry_async<T, E, Fut, F, P>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                if attempts >= config.max_retries {
                    warn!(
                        operation = %operation_name,
                        attempts = attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                match backoff.next_backoff() {
                    Some(duration) => {
                        warn!(
                            operation = %operation_name,
                            attempt = attempts,
                            error = %e,
                            retry_in_ms = duration.as_millis() as u64,
                            "Operation failed, retrying"
                        );
                        tokio::time::sleep(duration).await;
                    }
                    None => return Err(e),
                }
            }
        }
    }
}
