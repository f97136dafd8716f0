//! Jira client for release tracking tickets.
//!
//! Creates one Epic per release and one Task per model. Owner names are
//! resolved to account ids through user search, memoized in an
//! [`AccountCache`] that lives for a single initialization run.

use std::collections::HashMap;

use log::{info, warn};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{ensure_success, join_segments, parse_base_url, read_json};
use crate::config::settings::clone_secret;
use crate::config::{require, JiraSettings};
use crate::error::{ConfigError, Service, UpstreamError};
use crate::model::ModelRelease;

const SERVICE: Service = Service::Jira;

/// A ticket created in Jira.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CreatedIssue {
    pub key: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraUser {
    account_id: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email_address: Option<String>,
}

impl JiraUser {
    fn matches(&self, query: &str) -> bool {
        let eq = |v: &Option<String>| {
            v.as_deref()
                .map(|v| v.eq_ignore_ascii_case(query))
                .unwrap_or(false)
        };
        eq(&self.display_name) || eq(&self.email_address)
    }
}

/// Owner name to account id lookups made during one run. Misses are kept as `None`.
#[derive(Debug, Default)]
pub struct AccountCache {
    entries: HashMap<String, Option<String>>,
}

impl AccountCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, owner: &str) -> Option<&Option<String>> {
        self.entries.get(owner)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, owner: &str, account_id: Option<String>) {
        self.entries.insert(owner.to_string(), account_id);
    }
}

/// Jira Cloud REST client for release tickets.
pub struct JiraClient {
    http: Client,
    base: Url,
    email: String,
    api_token: SecretString,
    project_key: String,
    epic_type_name: String,
    task_type_name: String,
    epic_link_field_id: String,
    components_field_id: String,
    components_value_id: String,
}

impl JiraClient {
    /// Fails with the first missing Jira variable.
    pub fn new(http: Client, settings: &JiraSettings) -> Result<Self, ConfigError> {
        let url = require(settings.url.as_deref(), "JIRA_URL")?;
        let email = require(settings.email.as_deref(), "ATLASSIAN_EMAIL")?;
        let api_token = require(settings.api_token.as_ref(), "ATLASSIAN_API_TOKEN")?;
        let project_key = require(settings.project_key.as_deref(), "JIRA_PROJECT_KEY")?;
        let epic_link_field_id =
            require(settings.epic_link_field_id.as_deref(), "JIRA_EPIC_LINK_FIELD_ID")?;
        let components_field_id =
            require(settings.components_field_id.as_deref(), "JIRA_COMPONENTS_FIELD_ID")?;
        let components_value_id =
            require(settings.components_value_id.as_deref(), "JIRA_COMPONENTS_VALUE_ID")?;

        Ok(Self {
            http,
            base: parse_base_url(url, "JIRA_URL")?,
            email: email.to_string(),
            api_token: clone_secret(api_token),
            project_key: project_key.to_string(),
            epic_type_name: settings.epic_type_name.clone(),
            task_type_name: settings.task_type_name.clone(),
            epic_link_field_id: epic_link_field_id.to_string(),
            components_field_id: components_field_id.to_string(),
            components_value_id: components_value_id.to_string(),
        })
    }

    /// Browse URL of an issue: `{jira}/browse/{key}`.
    pub fn browse_url(&self, key: &str) -> String {
        join_segments(&self.base, &["browse", key]).to_string()
    }

    /// Resolves an owner name or email to an account id.
    ///
    /// Prefers an exact display name or email match, else the first result.
    /// Lookup failures are logged and cached as misses.
    pub async fn find_account_id(&self, cache: &mut AccountCache, owner: &str) -> Option<String> {
        let owner = owner.trim();
        if owner.is_empty() {
            return None;
        }
        if let Some(cached) = cache.get(owner) {
            return cached.clone();
        }

        let account_id = match self.search_users(owner).await {
            Ok(users) => {
                let found = users
                    .iter()
                    .find(|u| u.matches(owner))
                    .or_else(|| users.first())
                    .and_then(|u| u.account_id.clone());
                match &found {
                    Some(id) => info!("Resolved Jira account for '{}': {}", owner, id),
                    None => warn!(
                        "Jira user search for '{}' returned {} users, none usable",
                        owner,
                        users.len()
                    ),
                }
                found
            }
            Err(e) => {
                warn!("Jira user search failed for '{}': {}", owner, e);
                None
            }
        };

        cache.insert(owner, account_id.clone());
        account_id
    }

    async fn search_users(&self, query: &str) -> Result<Vec<JiraUser>, UpstreamError> {
        let mut url = join_segments(&self.base, &["rest", "api", "3", "user", "search"]);
        url.query_pairs_mut().append_pair("query", query);
        let response = self
            .http
            .get(url)
            .basic_auth(&self.email, Some(self.api_token.expose_secret()))
            .send()
            .await
            .map_err(|e| UpstreamError::request(SERVICE, e))?;
        let response = ensure_success(SERVICE, response).await?;
        read_json(SERVICE, response).await
    }

    /// Creates the tracking Epic for a release target.
    pub async fn create_epic(&self, release_target: &str) -> Result<CreatedIssue, UpstreamError> {
        let mut fields = self.base_fields(&self.epic_type_name);
        fields.insert(
            "summary".to_string(),
            json!(format!("Release Qualification - {}", release_target)),
        );
        fields.insert(
            "description".to_string(),
            adf_description(&format!(
                "Tracking Epic for all model qualifications for {}.",
                release_target
            )),
        );

        let issue = self.create_issue(fields).await?;
        info!("Created Jira Epic {}", issue.key);
        Ok(issue)
    }

    /// Creates one model's Task under the given Epic.
    pub async fn create_task(
        &self,
        model: &ModelRelease,
        epic_key: &str,
        account_id: Option<&str>,
    ) -> Result<CreatedIssue, UpstreamError> {
        let mut fields = self.base_fields(&self.task_type_name);
        fields.insert(
            "summary".to_string(),
            json!(format!(
                "[{}] Qualify Model: {}",
                model.release_target.trim(),
                model.model_name
            )),
        );
        fields.insert(
            "description".to_string(),
            adf_description(&task_description(model)),
        );
        fields.insert(self.epic_link_field_id.clone(), json!(epic_key));
        if let Some(account_id) = account_id {
            fields.insert("assignee".to_string(), json!({ "accountId": account_id }));
        }

        let issue = self.create_issue(fields).await?;
        info!(
            "Created Jira Task {} for model {}, assigned to {}",
            issue.key,
            model.model_name,
            account_id.unwrap_or("nobody")
        );
        Ok(issue)
    }

    fn base_fields(&self, issue_type: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("project".to_string(), json!({ "key": self.project_key }));
        fields.insert("issuetype".to_string(), json!({ "name": issue_type }));
        fields.insert(
            self.components_field_id.clone(),
            json!({ "id": self.components_value_id }),
        );
        fields
    }

    async fn create_issue(&self, fields: Map<String, Value>) -> Result<CreatedIssue, UpstreamError> {
        let url = join_segments(&self.base, &["rest", "api", "3", "issue"]);
        let response = self
            .http
            .post(url)
            .basic_auth(&self.email, Some(self.api_token.expose_secret()))
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(|e| UpstreamError::request(SERVICE, e))?;
        let response = ensure_success(SERVICE, response).await?;
        let created: IssueResponse = read_json(SERVICE, response).await?;
        Ok(CreatedIssue {
            url: self.browse_url(&created.key),
            key: created.key,
        })
    }
}

fn task_description(model: &ModelRelease) -> String {
    let or_na = |v: &str| {
        if v.trim().is_empty() {
            "N/A".to_string()
        } else {
            v.trim().to_string()
        }
    };
    [
        format!("Model: {}", model.model_name),
        format!("Owner: {}", model.owner_or("N/A")),
        format!("Branch: {}", model.branch),
        format!("MIQ Branch: {}", or_na(&model.miq_branch)),
        format!("App-Tag: {}", model.app_tag),
        format!("Usernode: {}", or_na(model.usernode.as_deref().unwrap_or(""))),
        format!("Multibox: {}", or_na(model.multibox.as_deref().unwrap_or(""))),
        format!("Labels: {}", model.labels),
        format!(
            "Monitor Link: {}",
            or_na(model.monitor_link.as_deref().unwrap_or(""))
        ),
    ]
    .join("\n")
}

/// Builds an Atlassian Document Format body with one paragraph per non-empty line.
pub fn adf_description(text: &str) -> Value {
    let mut paragraphs: Vec<Value> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| json!({ "type": "paragraph", "content": [{ "type": "text", "text": line }] }))
        .collect();
    if paragraphs.is_empty() {
        paragraphs.push(json!({
            "type": "paragraph",
            "content": [{ "type": "text", "text": "No description provided." }]
        }));
    }
    json!({ "type": "doc", "version": 1, "content": paragraphs })
}
