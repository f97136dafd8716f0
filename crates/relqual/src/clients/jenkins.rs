//! Jenkins REST client.
//!
//! Covers the crumb handshake, job probing and cloning, parameterized
//! builds, and queue/build status reads. All calls use HTTP Basic auth.

use log::{debug, info, warn};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{api_json_url, ensure_success, join_segments, parse_base_url, read_json};
use crate::config::settings::clone_secret;
use crate::config::{require, JenkinsSettings};
use crate::error::{ConfigError, Service, UpstreamError};

const SERVICE: Service = Service::Jenkins;

/// CSRF token issued by the crumb issuer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Crumb {
    pub crumb: String,
    pub crumb_request_field: String,
}

/// Queue item payload. `executable` appears once the item starts building.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueItem {
    #[serde(default)]
    pub executable: Option<Executable>,
    #[serde(default)]
    pub cancelled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Executable {
    pub url: String,
}

/// Build status payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildInfo {
    #[serde(default)]
    pub building: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub duration: u64,
    /// Build start, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Result of a `createItem` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateItemOutcome {
    Created,
    AlreadyExists,
}

/// Authenticated client for one Jenkins instance.
pub struct JenkinsClient {
    http: Client,
    base: Url,
    username: String,
    api_token: SecretString,
}

impl JenkinsClient {
    /// Builds a client from settings. Fails if URL or credentials are absent.
    pub fn new(http: Client, settings: &JenkinsSettings) -> Result<Self, ConfigError> {
        let url = require(settings.url.as_deref(), "JENKINS_URL")?;
        let username = require(settings.username.as_deref(), "JENKINS_USERNAME")?;
        let api_token = require(settings.api_token.as_ref(), "JENKINS_API_TOKEN")?;
        Ok(Self {
            http,
            base: parse_base_url(url, "JENKINS_URL")?,
            username: username.to_string(),
            api_token: clone_secret(api_token),
        })
    }

    /// Browsable URL of a job: `{base}/job/{name}/`.
    pub fn job_url(&self, name: &str) -> String {
        join_segments(&self.base, &["job", name, ""]).to_string()
    }

    /// Fetches a fresh crumb. `None` means the server has no CSRF protection.
    pub async fn crumb(&self) -> Result<Option<Crumb>, UpstreamError> {
        let url = join_segments(&self.base, &["crumbIssuer", "api", "json"]);
        let response = self.get(url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!("Jenkins crumb issuer not found, proceeding without crumb");
            return Ok(None);
        }
        let response = ensure_success(SERVICE, response).await?;
        let crumb: Crumb = read_json(SERVICE, response).await?;
        debug!("Obtained Jenkins crumb for field {}", crumb.crumb_request_field);
        Ok(Some(crumb))
    }

    /// Probes whether a job exists. 404 means absent; other failures are errors.
    pub async fn job_exists(&self, name: &str) -> Result<bool, UpstreamError> {
        let url = join_segments(&self.base, &["job", name, "api", "json"]);
        let response = self.get(url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(SERVICE, response).await?;
        Ok(true)
    }

    /// Reads a job's `config.xml`.
    pub async fn config_xml(&self, name: &str) -> Result<String, UpstreamError> {
        let url = join_segments(&self.base, &["job", name, "config.xml"]);
        let response = ensure_success(SERVICE, self.get(url).await?).await?;
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::request(SERVICE, e))?;
        if !body.starts_with("<?xml") {
            return Err(UpstreamError::malformed(
                SERVICE,
                format!("invalid config.xml from '{}'", name),
            ));
        }
        Ok(body)
    }

    /// Creates a job from a configuration document.
    pub async fn create_item(
        &self,
        name: &str,
        config_xml: &str,
        crumb: Option<&Crumb>,
    ) -> Result<CreateItemOutcome, UpstreamError> {
        let mut url = join_segments(&self.base, &["createItem"]);
        url.query_pairs_mut().append_pair("name", name);

        let mut request = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(self.api_token.expose_secret()))
            .header(CONTENT_TYPE, "application/xml")
            .body(config_xml.to_string());
        if let Some(crumb) = crumb {
            request = request.header(crumb.crumb_request_field.as_str(), crumb.crumb.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::request(SERVICE, e))?;

        let status = response.status();
        if status.is_success() {
            info!("Created Jenkins job '{}'", name);
            return Ok(CreateItemOutcome::Created);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("already exists") {
            info!("Jenkins job '{}' already exists", name);
            return Ok(CreateItemOutcome::AlreadyExists);
        }
        Err(UpstreamError::from_status(SERVICE, status.as_u16(), &body))
    }

    /// Queues a parameterized build and returns the queue item URL.
    pub async fn build_with_parameters(
        &self,
        job_name: &str,
        params: &[(&str, String)],
        crumb: Option<&Crumb>,
    ) -> Result<String, UpstreamError> {
        let url = join_segments(&self.base, &["job", job_name, "buildWithParameters"]);
        let mut request = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(self.api_token.expose_secret()))
            .form(params);
        if let Some(crumb) = crumb {
            request = request.header(crumb.crumb_request_field.as_str(), crumb.crumb.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::request(SERVICE, e))?;

        if response.status() != StatusCode::CREATED {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(SERVICE, status, &body));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| UpstreamError::malformed(SERVICE, "no queue location returned"))?;
        let queue_url = self
            .base
            .join(location)
            .map_err(|e| UpstreamError::malformed(SERVICE, format!("bad queue location: {}", e)))?;
        Ok(queue_url.to_string())
    }

    /// Reads a queue item.
    pub async fn queue_item(&self, queue_url: &str) -> Result<QueueItem, UpstreamError> {
        self.get_json(&api_json_url(queue_url)).await
    }

    /// Reads a build's status.
    pub async fn build_info(&self, build_url: &str) -> Result<BuildInfo, UpstreamError> {
        self.get_json(&api_json_url(build_url)).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, UpstreamError> {
        let url = Url::parse(url)
            .map_err(|e| UpstreamError::malformed(SERVICE, format!("bad URL '{}': {}", url, e)))?;
        let response = ensure_success(SERVICE, self.get(url).await?).await?;
        read_json(SERVICE, response).await
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, UpstreamError> {
        self.http
            .get(url)
            .basic_auth(&self.username, Some(self.api_token.expose_secret()))
            .send()
            .await
            .map_err(|e| UpstreamError::request(SERVICE, e))
    }
}
