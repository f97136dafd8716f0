//! Release dashboard client.

use log::info;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use super::{ensure_success, join_segments, parse_base_url, read_json};
use crate::config::{require, DashboardSettings};
use crate::error::{ConfigError, Service, UpstreamError};
use crate::model::ModelRelease;

const SERVICE: Service = Service::Dashboard;

#[derive(Debug, Deserialize)]
struct TargetReleases {
    #[serde(default)]
    release: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetTargetReleases<'a> {
    release: &'a [String],
    description: &'a str,
    user_name: &'a str,
}

/// One model entry in a release roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterModel {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub git_branch: String,
}

impl RosterModel {
    pub fn from_release(model: &ModelRelease, default_user: &str) -> Self {
        Self {
            name: model.model_name.clone(),
            owner: model.owner_or(default_user).to_string(),
            git_branch: model.branch.clone(),
        }
    }
}

/// Models tracked by the dashboard for one release target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRoster {
    pub release: String,
    #[serde(default)]
    pub models: Vec<RosterModel>,
}

impl ReleaseRoster {
    /// Replaces models with the same name and appends new ones.
    pub fn merge(&mut self, models: impl IntoIterator<Item = RosterModel>) {
        for model in models {
            match self.models.iter_mut().find(|m| m.name == model.name) {
                Some(existing) => *existing = model,
                None => self.models.push(model),
            }
        }
    }
}

/// Client for the qualification dashboard API.
pub struct DashboardClient {
    http: Client,
    base: Url,
}

impl DashboardClient {
    /// Requires `DASHBOARD_API_BASE_URL`.
    pub fn new(http: Client, settings: &DashboardSettings) -> Result<Self, ConfigError> {
        let url = require(settings.base_url.as_deref(), "DASHBOARD_API_BASE_URL")?;
        Ok(Self {
            http,
            base: parse_base_url(url, "DASHBOARD_API_BASE_URL")?,
        })
    }

    /// Active release targets known to the dashboard.
    pub async fn target_releases(&self) -> Result<Vec<String>, UpstreamError> {
        let url = join_segments(&self.base, &["target-release"]);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::request(SERVICE, e))?;
        let response = ensure_success(SERVICE, response).await?;
        let targets: TargetReleases = read_json(SERVICE, response).await?;
        Ok(targets.release)
    }

    /// Replaces the list of active release targets.
    pub async fn set_target_releases(
        &self,
        releases: &[String],
        description: &str,
        user_name: &str,
    ) -> Result<(), UpstreamError> {
        let url = join_segments(&self.base, &["target-release"]);
        let payload = SetTargetReleases {
            release: releases,
            description,
            user_name,
        };
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| UpstreamError::request(SERVICE, e))?;
        ensure_success(SERVICE, response).await?;
        info!("Dashboard target releases set to {:?}", releases);
        Ok(())
    }

    /// Registers the model roster for a release target.
    pub async fn populate_models(&self, roster: &ReleaseRoster) -> Result<(), UpstreamError> {
        let url = join_segments(&self.base, &["releases"]);
        let response = self
            .http
            .post(url)
            .json(roster)
            .send()
            .await
            .map_err(|e| UpstreamError::request(SERVICE, e))?;
        ensure_success(SERVICE, response).await?;
        info!(
            "Dashboard populated with {} models for {}",
            roster.models.len(),
            roster.release
        );
        Ok(())
    }

    /// Reads the current roster of a release target.
    pub async fn release_roster(&self, release: &str) -> Result<ReleaseRoster, UpstreamError> {
        let mut url = join_segments(&self.base, &["releases"]);
        url.query_pairs_mut().append_pair("releaseName", release);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::request(SERVICE, e))?;
        let response = ensure_success(SERVICE, response).await?;
        read_json(SERVICE, response).await
    }

    /// Overwrites the roster of a release target.
    pub async fn update_roster(&self, roster: &ReleaseRoster) -> Result<(), UpstreamError> {
        let url = join_segments(&self.base, &["releases"]);
        let response = self
            .http
            .put(url)
            .json(roster)
            .send()
            .await
            .map_err(|e| UpstreamError::request(SERVICE, e))?;
        ensure_success(SERVICE, response).await?;
        info!(
            "Dashboard roster for {} updated ({} models)",
            roster.release,
            roster.models.len()
        );
        Ok(())
    }

    /// True when the dashboard already lists `release` as a target.
    pub async fn is_initialized(&self, release: &str) -> Result<bool, UpstreamError> {
        Ok(self
            .target_releases()
            .await?
            .iter()
            .any(|r| r == release))
    }
}
