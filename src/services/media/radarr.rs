//! Radarr client
//!
//! Wanted lists are movie-level, so the trigger id and library key coincide.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::http::ArrHttp;
use super::sonarr::{CommandResponse, SystemStatus};
use super::{CommandResult, ConnectionTest, MediaServerClient, WantedItem, WantedPage, WantedQuery};
use crate::db::{ContentType, InstanceKind};
use crate::error::SearchError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoviePage {
    #[serde(default)]
    total_records: u64,
    #[serde(default)]
    records: Vec<MovieRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovieRecord {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    digital_release: Option<String>,
    #[serde(default)]
    physical_release: Option<String>,
    #[serde(default)]
    in_cinemas: Option<String>,
    #[serde(default)]
    added: Option<String>,
    #[serde(default = "default_true")]
    monitored: bool,
}

fn default_true() -> bool {
    true
}

impl From<MovieRecord> for WantedItem {
    fn from(r: MovieRecord) -> Self {
        let title = match (r.title, r.year) {
            (Some(t), Some(y)) if y > 0 => format!("{} ({})", t, y),
            (Some(t), _) => t,
            (None, _) => format!("Movie {}", r.id),
        };

        WantedItem {
            id: r.id,
            external_id: r.id,
            content_type: ContentType::Movie,
            title,
            content_date: r
                .digital_release
                .or(r.physical_release)
                .or(r.in_cinemas)
                .or(r.added),
            monitored: r.monitored,
        }
    }
}

/// Radarr `/api/v3` client
pub struct RadarrClient {
    http: ArrHttp,
}

impl RadarrClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, SearchError> {
        Ok(Self {
            http: ArrHttp::new("radarr", base_url, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl MediaServerClient for RadarrClient {
    fn kind(&self) -> InstanceKind {
        InstanceKind::Radarr
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
            ("sortKey", "movieMetadata.sortTitle".to_string()),
            ("sortDirection", "ascending".to_string()),
            ("monitored", query.monitored_only.to_string()),
        ]);

        let body: MoviePage = self.http.send_json(request).await?;
        debug!(page, records = body.records.len(), total = body.total_records, "Fetched Radarr wanted page");

        Ok(WantedPage {
            total: body.total_records,
            records: body.records.into_iter().map(WantedItem::from).collect(),
        })
    }

    async fn trigger_search(&self, ids: &[i64]) -> Result<CommandResult, SearchError> {
        let request = self
            .http
            .post("command")
            .json(&json!({ "name": "MoviesSearch", "movieIds": ids }));

        let command: CommandResponse = self.http.send_json(request).await?;
        Ok(command.into())
    }
}
