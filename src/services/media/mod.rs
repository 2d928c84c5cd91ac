//! Media-server clients (Sonarr, Radarr)
//!
//! Both speak the `/api/v3` dialect with an `X-Api-Key` header. The engine
//! only sees the [`MediaServerClient`] trait; [`ArrClientFactory`] picks the
//! implementation from the instance kind.

mod http;
pub mod radarr;
pub mod sonarr;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::db::{ContentType, InstanceKind, QueueFilters, SearchQueueRecord, SearchStrategy};
use crate::error::SearchError;

pub use radarr::RadarrClient;
pub use sonarr::SonarrClient;

/// Which remote wanted list to page through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WantedSource {
    Missing,
    CutoffUnmet,
}

impl WantedSource {
    pub fn path(&self) -> &'static str {
        match self {
            WantedSource::Missing => "wanted/missing",
            WantedSource::CutoffUnmet => "wanted/cutoff",
        }
    }
}

/// One searchable unit returned by a wanted list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WantedItem {
    /// Id passed to the search command (episode id or movie id)
    pub id: i64,
    /// Library key: series id for Sonarr, movie id for Radarr
    pub external_id: i64,
    pub content_type: ContentType,
    pub title: String,
    /// Air/release/added date as reported by the server
    pub content_date: Option<String>,
    pub monitored: bool,
}

impl WantedItem {
    /// Key shared with the local mirror and with exclusions
    pub fn key(&self) -> (String, ContentType) {
        (self.external_id.to_string(), self.content_type)
    }

    pub fn released_at(&self) -> Option<DateTime<Utc>> {
        self.content_date.as_deref().and_then(parse_content_date)
    }
}

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date
pub fn parse_content_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()?;
    Utc.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
}

/// What the engine asks a client for, plus the client-side filters a queue applies
#[derive(Debug, Clone)]
pub struct WantedQuery {
    pub source: WantedSource,
    pub page_size: u32,
    pub monitored_only: bool,
    pub recent_days: Option<i64>,
    pub title_contains: Option<String>,
    pub parent_ids: Vec<i64>,
}

impl WantedQuery {
    /// Build the query for a queue's strategy and filters
    pub fn for_queue(queue: &SearchQueueRecord, page_size: u32) -> Self {
        Self::from_parts(queue.strategy(), &queue.filters(), page_size)
    }

    pub fn from_parts(strategy: SearchStrategy, filters: &QueueFilters, page_size: u32) -> Self {
        let source = match strategy {
            SearchStrategy::CutoffUnmet => WantedSource::CutoffUnmet,
            SearchStrategy::Missing | SearchStrategy::Recent => WantedSource::Missing,
            SearchStrategy::Custom => match filters.source {
                Some(SearchStrategy::CutoffUnmet) => WantedSource::CutoffUnmet,
                _ => WantedSource::Missing,
            },
        };

        // "recent" without an explicit window looks back 30 days
        let recent_days = match strategy {
            SearchStrategy::Recent => Some(filters.recent_days.unwrap_or(30)),
            _ => filters.recent_days,
        };

        Self {
            source,
            page_size: page_size.max(1),
            monitored_only: filters.monitored_only,
            recent_days,
            title_contains: filters
                .title_contains
                .as_ref()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty()),
            parent_ids: filters.parent_ids.clone(),
        }
    }

    /// Client-side filters the remote APIs cannot express
    pub fn accepts(&self, item: &WantedItem, now: DateTime<Utc>) -> bool {
        if self.monitored_only && !item.monitored {
            return false;
        }
        if !self.parent_ids.is_empty() && !self.parent_ids.contains(&item.external_id) {
            return false;
        }
        if let Some(needle) = &self.title_contains {
            if !item.title.to_lowercase().contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(days) = self.recent_days {
            let Some(released) = item.released_at() else {
                return false;
            };
            if released > now || now - released > chrono::Duration::days(days) {
                return false;
            }
        }
        true
    }
}

/// One page of a wanted list
#[derive(Debug, Clone, Default)]
pub struct WantedPage {
    pub records: Vec<WantedItem>,
    /// Total records across all pages, as reported by the server
    pub total: u64,
}

/// Outcome of a connectivity probe. Never an error; failure is data.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub version: Option<String>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ConnectionTest {
    pub fn ok(version: Option<String>, latency_ms: u64) -> Self {
        Self {
            success: true,
            version,
            latency_ms,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: false,
            version: None,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

/// The command record returned when a search is queued
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub id: i64,
    pub name: String,
    pub status: String,
}

/// Capability set the engine and health monitor need from a media server
#[async_trait]
pub trait MediaServerClient: Send + Sync {
    fn kind(&self) -> InstanceKind;

    /// Probe the server. Failures are reported in the result.
    async fn test_connection(&self) -> ConnectionTest;

    /// Fetch one page (1-based) of the wanted list
    async fn get_wanted(&self, query: &WantedQuery, page: u32) -> Result<WantedPage, SearchError>;

    /// Queue a search for the given trigger ids
    async fn trigger_search(&self, ids: &[i64]) -> Result<CommandResult, SearchError>;
}

/// Builds a client for an instance with decrypted credentials
pub trait MediaClientFactory: Send + Sync {
    fn create(
        &self,
        kind: InstanceKind,
        base_url: &str,
        api_key: &str,
    ) -> Result<Arc<dyn MediaServerClient>, SearchError>;
}

/// Production factory backed by reqwest
#[derive(Debug, Clone)]
pub struct ArrClientFactory {
    timeout: Duration,
}

impl ArrClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl MediaClientFactory for ArrClientFactory {
    fn create(
        &self,
        kind: InstanceKind,
        base_url: &str,
        api_key: &str,
    ) -> Result<Arc<dyn MediaServerClient>, SearchError> {
        let client: Arc<dyn MediaServerClient> = match kind {
            InstanceKind::Sonarr => Arc::new(SonarrClient::new(base_url, api_key, self.timeout)?),
            InstanceKind::Radarr => Arc::new(RadarrClient::new(base_url, api_key, self.timeout)?),
        };
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(title: &str, date: Option<&str>, monitored: bool) -> WantedItem {
        WantedItem {
            id: 10,
            external_id: 3,
            content_type: ContentType::Series,
            title: title.to_string(),
            content_date: date.map(String::from),
            monitored,
        }
    }

    #[test]
    fn test_parse_content_date() {
        assert!(parse_content_date("2024-05-01T20:00:00Z").is_some());
        assert!(parse_content_date("2024-05-01").is_some());
        assert!(parse_content_date("").is_none());
        assert!(parse_content_date("soon").is_none());
    }

    #[test]
    fn test_source_follows_strategy() {
        let filters = QueueFilters::default();
        assert_eq!(
            WantedQuery::from_parts(SearchStrategy::CutoffUnmet, &filters, 50).source,
            WantedSource::CutoffUnmet
        );
        assert_eq!(
            WantedQuery::from_parts(SearchStrategy::Recent, &filters, 50).source,
            WantedSource::Missing
        );

        let custom = QueueFilters {
            source: Some(SearchStrategy::CutoffUnmet),
            ..QueueFilters::default()
        };
        assert_eq!(
            WantedQuery::from_parts(SearchStrategy::Custom, &custom, 50).source,
            WantedSource::CutoffUnmet
        );
    }

    #[test]
    fn test_recent_window() {
        let now = Utc::now();
        let query = WantedQuery::from_parts(SearchStrategy::Recent, &QueueFilters::default(), 50);
        assert_eq!(query.recent_days, Some(30));

        let fresh = (now - Duration::days(3)).to_rfc3339();
        let old = (now - Duration::days(90)).to_rfc3339();
        assert!(query.accepts(&item("A", Some(&fresh), true), now));
        assert!(!query.accepts(&item("A", Some(&old), true), now));
        assert!(!query.accepts(&item("A", None, true), now));
    }

    #[test]
    fn test_custom_filters() {
        let now = Utc::now();
        let filters = QueueFilters {
            title_contains: Some("Expanse".into()),
            parent_ids: vec![3],
            ..QueueFilters::default()
        };
        let query = WantedQuery::from_parts(SearchStrategy::Custom, &filters, 50);

        assert!(query.accepts(&item("The Expanse - Dulcinea", None, true), now));
        assert!(!query.accepts(&item("Other Show", None, true), now));
        assert!(!query.accepts(&item("The Expanse", None, false), now));

        let mut wrong_parent = item("The Expanse", None, true);
        wrong_parent.external_id = 4;
        assert!(!query.accepts(&wrong_parent, now));
    }
}
