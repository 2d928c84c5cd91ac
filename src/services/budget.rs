//! Indexer-budget resolution
//!
//! When a user has an active Prowlarr config, the indexers connected to the
//! instance's application report how many queries they still allow, and the
//! smallest remainder caps the run. Any failure along the way falls back to
//! the instance's own limits; the budget source can never block a run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::db::Database;
use crate::error::SearchError;
use crate::services::encryption::CredentialEncryption;

/// Where the admission cap of a run came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitSource {
    Instance,
    External,
}

impl LimitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitSource::Instance => "instance",
            LimitSource::External => "external",
        }
    }
}

/// Pacing rate and optional item cap for one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveLimit {
    pub rate_per_second: f64,
    pub max_items: Option<u32>,
    pub source: LimitSource,
}

impl EffectiveLimit {
    pub fn fallback(instance_rate: f64) -> Self {
        Self {
            rate_per_second: instance_rate,
            max_items: None,
            source: LimitSource::Instance,
        }
    }

    /// Combine with a queue's own cap by minimum
    pub fn admission_cap(&self, queue_max: usize) -> usize {
        match self.max_items {
            Some(limit) => queue_max.min(limit as usize),
            None => queue_max,
        }
    }
}

/// One indexer as reported by the budget source
#[derive(Debug, Clone, PartialEq)]
pub struct IndexerInfo {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub tags: Vec<i64>,
    /// Queries allowed per period; `None` or 0 means unlimited
    pub query_limit: Option<u32>,
    /// Set while the indexer is backed off after failures
    pub disabled_till: Option<String>,
}

/// An application (Sonarr/Radarr) registered with the budget source
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationInfo {
    pub id: i64,
    pub name: String,
    pub base_url: Option<String>,
    pub tags: Vec<i64>,
}

/// Queries an indexer has used in the current period
#[derive(Debug, Clone, PartialEq)]
pub struct IndexerUsage {
    pub indexer_id: i64,
    pub queries: u64,
}

/// External source of per-indexer quota
#[async_trait]
pub trait BudgetOracle: Send + Sync {
    async fn get_indexers(&self) -> Result<Vec<IndexerInfo>, SearchError>;
    async fn get_applications(&self) -> Result<Vec<ApplicationInfo>, SearchError>;
    async fn get_indexer_stats(&self) -> Result<Vec<IndexerUsage>, SearchError>;
}

/// Builds an oracle from a decrypted config
pub trait BudgetOracleFactory: Send + Sync {
    fn create(&self, base_url: &str, api_key: &str) -> Result<Arc<dyn BudgetOracle>, SearchError>;
}

/// Normalized `host[:port]` used to match instances against applications.
///
/// The scheme is ignored; a missing scheme is assumed to be http.
pub fn host_port_key(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.to_lowercase();
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Remaining-query budget for the instance at `instance_url`.
///
/// `None` means "no external cap": no matching application, no connected
/// indexer with a limit.
pub fn compute_budget(
    instance_url: &str,
    indexers: &[IndexerInfo],
    applications: &[ApplicationInfo],
    stats: &[IndexerUsage],
) -> Option<u32> {
    let target = host_port_key(instance_url)?;
    let app = applications.iter().find(|app| {
        app.base_url
            .as_deref()
            .and_then(host_port_key)
            .is_some_and(|key| key == target)
    })?;

    let app_tags: HashSet<i64> = app.tags.iter().copied().collect();
    let used: HashMap<i64, u64> = stats.iter().map(|s| (s.indexer_id, s.queries)).collect();

    indexers
        .iter()
        .filter(|ix| ix.enabled && ix.disabled_till.is_none())
        .filter(|ix| app_tags.is_empty() || ix.tags.iter().any(|t| app_tags.contains(t)))
        .filter_map(|ix| {
            let limit = ix.query_limit.filter(|l| *l > 0)?;
            let used = used.get(&ix.id).copied().unwrap_or(0);
            Some(u64::from(limit).saturating_sub(used) as u32)
        })
        .min()
}

/// Resolves the effective limit for a run
pub struct BudgetResolver {
    db: Database,
    encryption: Arc<CredentialEncryption>,
    factory: Arc<dyn BudgetOracleFactory>,
}

impl BudgetResolver {
    pub fn new(
        db: Database,
        encryption: Arc<CredentialEncryption>,
        factory: Arc<dyn BudgetOracleFactory>,
    ) -> Self {
        Self {
            db,
            encryption,
            factory,
        }
    }

    /// Never fails; every error path degrades to the instance's own limits
    pub async fn get_effective_limit(
        &self,
        instance_id: i64,
        user_id: i64,
        instance_rate: f64,
        instance_url: &str,
    ) -> EffectiveLimit {
        match self.resolve(user_id, instance_url).await {
            Ok(Some(max_items)) => {
                debug!(instance_id, max_items, "External indexer budget applies");
                EffectiveLimit {
                    rate_per_second: instance_rate,
                    max_items: Some(max_items),
                    source: LimitSource::External,
                }
            }
            Ok(None) => EffectiveLimit::fallback(instance_rate),
            Err(e) => {
                warn!(instance_id, user_id, error = %e, "Indexer budget unavailable, using instance limits");
                EffectiveLimit::fallback(instance_rate)
            }
        }
    }

    async fn resolve(&self, user_id: i64, instance_url: &str) -> Result<Option<u32>, SearchError> {
        let Some(config) = self
            .db
            .prowlarr_configs()
            .get_active_for_user(user_id)
            .await
            .map_err(|e| SearchError::BudgetOracleUnavailable(e.to_string()))?
        else {
            return Ok(None);
        };

        let api_key = self
            .encryption
            .decrypt(&config.encrypted_api_key, &config.api_key_nonce)
            .map_err(|e| SearchError::BudgetOracleUnavailable(format!("bad credentials: {}", e)))?;

        let oracle = self.factory.create(&config.url, &api_key)?;
        let (indexers, applications, stats) = tokio::try_join!(
            oracle.get_indexers(),
            oracle.get_applications(),
            oracle.get_indexer_stats()
        )?;

        Ok(compute_budget(instance_url, &indexers, &applications, &stats))
    }
}
