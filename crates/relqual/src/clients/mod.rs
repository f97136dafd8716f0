//! HTTP clients for the CI server, the release dashboard and the issue tracker.
//!
//! Each client owns explicit response schemas and turns non-2xx answers,
//! transport failures and undecodable payloads into [`UpstreamError`].

use std::time::Duration;

use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;

use crate::error::{ConfigError, Service, UpstreamError};

pub mod dashboard;
pub mod jenkins;
pub mod jira;

pub use dashboard::{DashboardClient, RosterModel, ReleaseRoster};
pub use jenkins::{BuildInfo, CreateItemOutcome, Crumb, JenkinsClient, QueueItem};
pub use jira::{AccountCache, CreatedIssue, JiraClient};

/// Default connect timeout for HTTP requests (10 seconds).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates the shared HTTP client with connect and request timeouts.
pub fn http_client(request_timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(request_timeout)
        .build()
}

/// Returns the response if it is 2xx, otherwise a classified status error.
pub(crate) async fn ensure_success(
    service: Service,
    response: Response,
) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UpstreamError::from_status(service, status.as_u16(), &body))
}

/// Reads a response body and decodes it into `T`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    service: Service,
    response: Response,
) -> Result<T, UpstreamError> {
    let body = response
        .text()
        .await
        .map_err(|e| UpstreamError::request(service, e))?;
    serde_json::from_str(&body).map_err(|e| UpstreamError::malformed(service, e.to_string()))
}

/// Parses a configured service base URL.
pub(crate) fn parse_base_url(raw: &str, name: &'static str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        name,
        reason: format!("'{}': {}", raw, e),
    })?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidValue {
            name,
            reason: format!("'{}' is not a base URL", raw),
        });
    }
    Ok(url)
}

/// Appends path segments to a base URL, percent-encoding each one.
pub(crate) fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Appends `api/json` to a CI resource URL, adding the separator if needed.
pub(crate) fn api_json_url(resource_url: &str) -> String {
    if resource_url.ends_with('/') {
        format!("{}api/json", resource_url)
    } else {
        format!("{}/api/json", resource_url)
    }
}
