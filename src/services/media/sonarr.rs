//! Sonarr client
//!
//! Wanted lists are episode-level; the library key is the episode's series.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::http::ArrHttp;
use super::{CommandResult, ConnectionTest, MediaServerClient, WantedItem, WantedPage, WantedQuery};
use crate::db::{ContentType, InstanceKind};
use crate::error::SearchError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SystemStatus {
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommandResponse {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl From<CommandResponse> for CommandResult {
    fn from(c: CommandResponse) -> Self {
        CommandResult {
            id: c.id,
            name: c.name,
            status: c.status.unwrap_or_else(|| "queued".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodePage {
    #[serde(default)]
    total_records: u64,
    #[serde(default)]
    records: Vec<EpisodeRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeRecord {
    id: i64,
    series_id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    season_number: Option<i32>,
    #[serde(default)]
    episode_number: Option<i32>,
    #[serde(default)]
    air_date_utc: Option<String>,
    #[serde(default)]
    air_date: Option<String>,
    #[serde(default = "default_true")]
    monitored: bool,
    #[serde(default)]
    series: Option<SeriesRef>,
}

#[derive(Debug, Deserialize)]
struct SeriesRef {
    #[serde(default)]
    title: Option<String>,
}

fn default_true() -> bool {
    true
}

impl From<EpisodeRecord> for WantedItem {
    fn from(r: EpisodeRecord) -> Self {
        let series = r.series.and_then(|s| s.title);
        let episode = match (r.season_number, r.episode_number) {
            (Some(s), Some(e)) => Some(format!("S{:02}E{:02}", s, e)),
            _ => None,
        };
        let title = [series, episode, r.title]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" - ");

        WantedItem {
            id: r.id,
            external_id: r.series_id,
            content_type: ContentType::Series,
            title,
            content_date: r.air_date_utc.or(r.air_date),
            monitored: r.monitored,
        }
    }
}

/// Sonarr `/api/v3` client
pub struct SonarrClient {
    http: ArrHttp,
}

impl SonarrClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, SearchError> {
        Ok(Self {
            http: ArrHttp::new("sonarr", base_url, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl MediaServerClient for SonarrClient {
    fn kind(&self) -> InstanceKind {
        InstanceKind::Sonarr
    }

    async fn test_connection(&self) -> ConnectionTest {
        let started = Instant::now();
        let result = self
            .http
            .send_json::<SystemStatus>(self.http.get("system/status"))
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(status) => ConnectionTest::ok(status.version, latency_ms),
            Err(e) => ConnectionTest::failed(e.to_string(), latency_ms),
        }
    }

    async fn get_wanted(&self, query: &WantedQuery, page: u32) -> Result<WantedPage, SearchError> {
        let request = self.http.get(query.source.path()).query(&[
            ("page", page.to_string()),
            ("pageSize", query.page_size.to_string()),
            ("sortKey", "airDateUtc".to_string()),
            ("sortDirection", "descending".to_string()),
            ("includeSeries", "true".to_string()),
            ("monitored", query.monitored_only.to_string()),
        ]);

        let body: EpisodePage = self.http.send_json(request).await?;
        debug!(page, records = body.records.len(), total = body.total_records, "Fetched Sonarr wanted page");

        Ok(WantedPage {
            total: body.total_records,
            records: body.records.into_iter().map(WantedItem::from).collect(),
        })
    }

    async fn trigger_search(&self, ids: &[i64]) -> Result<CommandResult, SearchError> {
        let request = self
            .http
            .post("command")
            .json(&json!({ "name": "EpisodeSearch", "episodeIds": ids }));

        let command: CommandResponse = self.http.send_json(request).await?;
        Ok(command.into())
    }
}
