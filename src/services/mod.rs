//! Search services: evaluation, execution and the external clients they use

pub mod budget;
pub mod cooldown;
pub mod encryption;
pub mod engine;
pub mod health;
pub mod logging;
pub mod media;
pub mod notifications;
pub mod priority;
pub mod prowlarr;
pub mod rate_limiter;

pub use budget::{BudgetOracle, BudgetOracleFactory, BudgetResolver, EffectiveLimit, LimitSource};
pub use encryption::CredentialEncryption;
pub use engine::{EngineConfig, ExecutionOutcome, SearchEngine};
pub use health::{HealthConfig, HealthMonitor, HealthReport, InstanceHealthResult};
pub use logging::{LogFormat, init_tracing};
pub use media::{ArrClientFactory, MediaClientFactory, MediaServerClient};
pub use notifications::{
    LogNotificationSink, NotificationEvent, NotificationService, NotificationSink,
    WebhookNotificationSink,
};
pub use prowlarr::{ProwlarrClient, ProwlarrClientFactory};
pub use rate_limiter::{RateLimiterRegistry, RetryConfig};
