//! Prowlarr `/api/v1` client used as the indexer-budget oracle

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::SearchError;
use crate::services::budget::{
    ApplicationInfo, BudgetOracle, BudgetOracleFactory, IndexerInfo, IndexerUsage,
};

/// Field holding an indexer's query limit
const QUERY_LIMIT_FIELD: &str = "baseSettings.queryLimit";
/// Field holding an application's own URL
const BASE_URL_FIELD: &str = "baseUrl";

#[derive(Debug, Deserialize)]
struct Field {
    name: String,
    #[serde(default)]
    value: JsonValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexerResource {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    enable: bool,
    #[serde(default)]
    tags: Vec<i64>,
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexerStatusResource {
    indexer_id: i64,
    #[serde(default)]
    disabled_till: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationResource {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tags: Vec<i64>,
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
struct IndexerStatsResource {
    #[serde(default)]
    indexers: Vec<IndexerStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexerStatistics {
    indexer_id: i64,
    #[serde(default)]
    number_of_queries: u64,
}

fn field<'a>(fields: &'a [Field], name: &str) -> Option<&'a JsonValue> {
    fields.iter().find(|f| f.name == name).map(|f| &f.value)
}

fn query_limit(fields: &[Field]) -> Option<u32> {
    match field(fields, QUERY_LIMIT_FIELD)? {
        JsonValue::Number(n) => n.as_u64().map(|v| v.min(u32::MAX as u64) as u32),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Prowlarr API client
pub struct ProwlarrClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl ProwlarrClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::BudgetOracleUnavailable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}/api/v1/{}", self.base_url, path))
            .header("X-Api-Key", &self.api_key)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SearchError> {
        let response = request
            .send()
            .await
            .map_err(|e| SearchError::BudgetOracleUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::BudgetOracleUnavailable(format!(
                "Prowlarr returned HTTP {}",
                status.as_u16()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SearchError::BudgetOracleUnavailable(format!("invalid response: {}", e)))
    }
}

#[async_trait]
impl BudgetOracle for ProwlarrClient {
    async fn get_indexers(&self) -> Result<Vec<IndexerInfo>, SearchError> {
        let (indexers, statuses) = tokio::try_join!(
            self.fetch::<Vec<IndexerResource>>(self.get("indexer")),
            self.fetch::<Vec<IndexerStatusResource>>(self.get("indexerstatus"))
        )?;

        Ok(merge_indexers(indexers, statuses))
    }

    async fn get_applications(&self) -> Result<Vec<ApplicationInfo>, SearchError> {
        let apps = self
            .fetch::<Vec<ApplicationResource>>(self.get("applications"))
            .await?;
        Ok(apps.into_iter().map(ApplicationInfo::from).collect())
    }

    async fn get_indexer_stats(&self) -> Result<Vec<IndexerUsage>, SearchError> {
        // Query limits are daily, so usage is counted over the last 24 hours
        let end = Utc::now();
        let start = end - chrono::Duration::hours(24);
        let request = self.get("indexerstats").query(&[
            ("startDate", start.to_rfc3339()),
            ("endDate", end.to_rfc3339()),
        ]);

        let stats = self.fetch::<IndexerStatsResource>(request).await?;
        Ok(stats
            .indexers
            .into_iter()
            .map(|s| IndexerUsage {
                indexer_id: s.indexer_id,
                queries: s.number_of_queries,
            })
            .collect())
    }
}

impl From<ApplicationResource> for ApplicationInfo {
    fn from(app: ApplicationResource) -> Self {
        let base_url = field(&app.fields, BASE_URL_FIELD)
            .and_then(|v| v.as_str())
            .map(String::from);
        ApplicationInfo {
            id: app.id,
            name: app.name.unwrap_or_default(),
            base_url,
            tags: app.tags,
        }
    }
}

fn merge_indexers(
    indexers: Vec<IndexerResource>,
    statuses: Vec<IndexerStatusResource>,
) -> Vec<IndexerInfo> {
    indexers
        .into_iter()
        .map(|ix| {
            let disabled_till = statuses
                .iter()
                .find(|s| s.indexer_id == ix.id)
                .and_then(|s| s.disabled_till.clone());
            IndexerInfo {
                id: ix.id,
                name: ix.name.unwrap_or_default(),
                enabled: ix.enable,
                tags: ix.tags,
                query_limit: query_limit(&ix.fields),
                disabled_till,
            }
        })
        .collect()
}

/// Production oracle factory
#[derive(Debug, Clone)]
pub struct ProwlarrClientFactory {
    timeout: Duration,
}

impl ProwlarrClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl BudgetOracleFactory for ProwlarrClientFactory {
    fn create(&self, base_url: &str, api_key: &str) -> Result<Arc<dyn BudgetOracle>, SearchError> {
        Ok(Arc::new(ProwlarrClient::new(base_url, api_key, self.timeout)?))
    }
}
