//! HTTP client for the telemetry provider APIs
//!
//! Thin wrapper over `reqwest` that maps provider status codes onto
//! `IngestError` so the fetcher can decide between retrying and aborting.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Response, StatusCode};

use crate::error::{IngestError, Result};
use crate::sources::PageRequest;

/// User agent for provider requests
const CLIENT_USER_AGENT: &str = concat!("iot-ingest/", env!("CARGO_PKG_VERSION"));

/// Telemetry provider API client
#[derive(Clone)]
pub struct TelemetryClient {
    client: Client,
    base_url: String,
}

impl TelemetryClient {
    /// Create a new API client for the given base URL
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the full URL for a given path
    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Build request headers
    fn build_headers(&self, request: &PageRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &request.headers {
            let name = HeaderName::from_static(name);
            let value = HeaderValue::from_str(value)
                .map_err(|e| IngestError::config(format!("Invalid header {}: {}", name, e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Send a GET request for one page and return the response
    pub async fn get(&self, request: &PageRequest) -> Result<Response> {
        let url = self.build_url(&request.path);
        let headers = self.build_headers(request)?;

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .query(&request.query)
            .send()
            .await
            .map_err(IngestError::Http)?;

        self.handle_response_status(response).await
    }

    /// Send a GET request and parse the body as JSON
    pub async fn get_json(&self, request: &PageRequest) -> Result<serde_json::Value> {
        let response = self.get(request).await?;
        let body = response.text().await.map_err(IngestError::Http)?;
        serde_json::from_str(&body)
            .map_err(|e| IngestError::malformed(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle response status codes and convert to errors
    async fn handle_response_status(&self, response: Response) -> Result<Response> {
        let status = response.status();

        match status {
            StatusCode::OK => Ok(response),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(IngestError::RateLimited { retry_after })
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(IngestError::Api {
                    status: status.as_u16(),
                    message: body.chars().take(200).collect(),
                })
            }
        }
    }
}
