//! Shared HTTP plumbing for the `/api/v3` clients

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::SearchError;

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 300;

/// Base URL + API key + reqwest client
#[derive(Clone)]
pub(crate) struct ArrHttp {
    client: Client,
    base_url: String,
    api_key: String,
    name: &'static str,
}

impl ArrHttp {
    pub fn new(
        name: &'static str,
        base_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::InstanceUnreachable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            name,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v3/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .header("X-Api-Key", &self.api_key)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .header("X-Api-Key", &self.api_key)
    }

    /// Send a request and decode a JSON body, classifying failures
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SearchError> {
        let response = request.send().await.map_err(classify_transport)?;
        let response = check_status(response).await?;
        let status = response.status().as_u16();

        debug!(client = self.name, status, "Received response");

        response.json::<T>().await.map_err(|e| SearchError::InstanceApi {
            status,
            message: format!("invalid response body: {}", e),
        })
    }
}

fn classify_transport(e: reqwest::Error) -> SearchError {
    SearchError::InstanceUnreachable(e.to_string())
}

async fn check_status(response: Response) -> Result<Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SearchError::InstanceAuth {
            status: status.as_u16(),
        }),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            Err(SearchError::InstanceRateLimited { retry_after_secs })
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(SearchError::InstanceApi {
                status: status.as_u16(),
                message: truncate(&body, MAX_ERROR_BODY),
            })
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
