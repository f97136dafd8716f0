//! Release initialization.
//!
//! Drives the dashboard, Jenkins and Jira in order and records the links
//! that came out of it:
//!
//! 1. dashboard: register the target and its model roster
//! 2. jenkins: clone the per-release job from the template
//! 3. jira: create the tracking Epic and one Task per model
//! 4. save: upsert the release row
//!
//! Steps 1 and 2 stop the sequence on failure. A failed step 3 is logged
//! and step 4 still runs with whatever ticket links exist. Nothing is
//! rolled back; a partially initialized dashboard is repaired through
//! [`Initializer::edit_dashboard`].

use std::collections::BTreeSet;

use futures_util::future::join_all;
use log::{error, info, warn};
use reqwest::Client;
use serde::Serialize;

use crate::clients::{
    AccountCache, CreatedIssue, DashboardClient, JenkinsClient, JiraClient, ReleaseRoster,
    RosterModel,
};
use crate::config::{require, JobNaming, Settings};
use crate::db::{release_repo, Database};
use crate::error::{ConfigError, RelqualError, UpstreamError};
use crate::model::{ReleaseBatch, ReleaseId, ReleaseLinks};

const TARGET_DESCRIPTION: &str = "New Release Initiation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    #[default]
    Pending,
    Loading,
    Success,
    Failed,
}

/// State of each initialization step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct InitSteps {
    pub dashboard: StepState,
    pub jenkins: StepState,
    pub jira: StepState,
    pub save: StepState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub already_initialized: bool,
}

/// Result of creating one model's Task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<CreatedIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn success(&self) -> bool {
        self.issue.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReport {
    pub release_id: String,
    pub success: bool,
    pub already_initialized: bool,
    pub message: String,
    pub steps: InitSteps,
    pub jenkins_job_name: Option<String>,
    pub jenkins_job_url: Option<String>,
    pub epic: Option<CreatedIssue>,
    pub tasks: Vec<TaskOutcome>,
}

impl InitReport {
    fn new(release_id: &str) -> Self {
        Self {
            release_id: release_id.to_string(),
            success: false,
            already_initialized: false,
            message: String::new(),
            steps: InitSteps::default(),
            jenkins_job_name: None,
            jenkins_job_url: None,
            epic: None,
            tasks: Vec::new(),
        }
    }

    fn fail(mut self, message: String) -> Self {
        error!("{}", message);
        self.success = false;
        self.message = message;
        self
    }
}

/// Sets up a release on the dashboard, the CI server and Jira.
pub struct Initializer {
    dashboard: DashboardClient,
    jenkins: Result<JenkinsClient, ConfigError>,
    jira: Result<JiraClient, ConfigError>,
    db: Database,
    naming: JobNaming,
    template_job_name: Option<String>,
    default_user: String,
}

impl Initializer {
    /// Builds the sequencer. Only the dashboard is required up front; missing
    /// Jenkins or Jira settings fail their step when it runs.
    pub fn new(settings: &Settings, http: Client, db: Database) -> Result<Self, ConfigError> {
        Ok(Self {
            dashboard: DashboardClient::new(http.clone(), &settings.dashboard)?,
            jenkins: JenkinsClient::new(http.clone(), &settings.jenkins),
            jira: JiraClient::new(http, &settings.jira),
            db,
            naming: settings.jenkins.naming.clone(),
            template_job_name: settings.jenkins.template_job_name.clone(),
            default_user: settings.dashboard.default_username.clone(),
        })
    }

    /// Reports whether the dashboard already tracks `target`. No side effects.
    pub async fn check(&self, target: &ReleaseId) -> Result<CheckOutcome, UpstreamError> {
        let already_initialized = self.dashboard.is_initialized(target.as_str()).await?;
        Ok(CheckOutcome {
            already_initialized,
        })
    }

    /// Runs the full initialization sequence for a batch.
    pub async fn run(&self, batch: &ReleaseBatch, user_name: &str) -> InitReport {
        let target = batch.target().as_str();
        let user = self.user_or_default(user_name);
        let mut report = InitReport::new(target);

        match self.check(batch.target()).await {
            Ok(CheckOutcome {
                already_initialized: true,
            }) => {
                info!("Release {} is already initialized", target);
                report.already_initialized = true;
                report.message = format!(
                    "Release {} is already initialized. Use the dashboard edit to change its models.",
                    target
                );
                return report;
            }
            Ok(_) => {}
            Err(e) => return report.fail(format!("Dashboard check failed: {}", e)),
        }

        report.steps.dashboard = StepState::Loading;
        if let Err(e) = self.setup_dashboard(batch, user).await {
            report.steps.dashboard = StepState::Failed;
            return report.fail(format!("Dashboard step failed: {}", e));
        }
        report.steps.dashboard = StepState::Success;

        report.steps.jenkins = StepState::Loading;
        let job_name = self.naming.release_job_name(target);
        match self.clone_job(&job_name).await {
            Ok(job_url) => {
                report.steps.jenkins = StepState::Success;
                report.jenkins_job_name = Some(job_name);
                report.jenkins_job_url = Some(job_url);
            }
            Err(e) => {
                report.steps.jenkins = StepState::Failed;
                return report.fail(format!("Jenkins step failed: {}", e));
            }
        }

        report.steps.jira = StepState::Loading;
        let mut jira_error = None;
        match self.create_tickets(batch).await {
            Ok((epic, tasks)) => {
                report.steps.jira = StepState::Success;
                report.epic = Some(epic);
                report.tasks = tasks;
            }
            Err(e) => {
                error!("Jira step failed for {}: {}", target, e);
                report.steps.jira = StepState::Failed;
                jira_error = Some(e.to_string());
            }
        }

        report.steps.save = StepState::Loading;
        let links = ReleaseLinks {
            jenkins_job_url: report.jenkins_job_url.clone(),
            jenkins_job_name: report.jenkins_job_name.clone(),
            jira_epic_key: report.epic.as_ref().map(|e| e.key.clone()),
            jira_epic_url: report.epic.as_ref().map(|e| e.url.clone()),
        };
        if let Err(e) = release_repo::upsert(&self.db, target, &links) {
            report.steps.save = StepState::Failed;
            return report.fail(format!("Saving release links failed: {}", e));
        }
        report.steps.save = StepState::Success;

        report.success = true;
        report.message = match jira_error {
            None => {
                let failed_tasks = report.tasks.iter().filter(|t| !t.success()).count();
                if failed_tasks == 0 {
                    format!("Release {} initialized.", target)
                } else {
                    format!(
                        "Release {} initialized; {} of {} Jira tasks failed.",
                        target,
                        failed_tasks,
                        report.tasks.len()
                    )
                }
            }
            Some(e) => format!(
                "Release {} initialized without Jira tickets: {}",
                target, e
            ),
        };
        info!("{}", report.message);
        report
    }

    /// Merges the batch's models into the dashboard roster of its target.
    pub async fn edit_dashboard(
        &self,
        batch: &ReleaseBatch,
        user_name: &str,
    ) -> Result<ReleaseRoster, UpstreamError> {
        let target = batch.target().as_str();
        let user = self.user_or_default(user_name);

        let mut roster = self.dashboard.release_roster(target).await?;
        if roster.release.is_empty() {
            roster.release = target.to_string();
        }
        roster.merge(
            batch
                .items()
                .iter()
                .map(|m| RosterModel::from_release(m, user)),
        );
        self.dashboard.update_roster(&roster).await?;
        Ok(roster)
    }

    fn user_or_default<'a>(&'a self, user_name: &'a str) -> &'a str {
        let user_name = user_name.trim();
        if user_name.is_empty() {
            &self.default_user
        } else {
            user_name
        }
    }

    async fn setup_dashboard(&self, batch: &ReleaseBatch, user: &str) -> Result<(), UpstreamError> {
        let target = batch.target().as_str();
        let mut targets = self.dashboard.target_releases().await?;
        if !targets.iter().any(|t| t == target) {
            targets.push(target.to_string());
        }
        self.dashboard
            .set_target_releases(&targets, TARGET_DESCRIPTION, user)
            .await?;

        let roster = ReleaseRoster {
            release: target.to_string(),
            models: batch
                .items()
                .iter()
                .map(|m| RosterModel::from_release(m, user))
                .collect(),
        };
        self.dashboard.populate_models(&roster).await
    }

    /// Ensures the per-release job exists and returns its URL.
    async fn clone_job(&self, job_name: &str) -> Result<String, RelqualError> {
        let jenkins = self.jenkins.as_ref().map_err(|e| e.clone())?;
        let template = require(
            self.template_job_name.as_deref(),
            "JENKINS_TEMPLATE_JOB_NAME",
        )?;

        match jenkins.job_exists(job_name).await {
            Ok(true) => {
                info!("Jenkins job '{}' already exists", job_name);
                return Ok(jenkins.job_url(job_name));
            }
            Ok(false) => {}
            Err(e) => warn!(
                "Could not verify job existence for '{}': {}. Proceeding with creation attempt.",
                job_name, e
            ),
        }

        let config_xml = jenkins.config_xml(template).await?;
        let crumb = match jenkins.crumb().await {
            Ok(crumb) => crumb,
            Err(e) => {
                warn!(
                    "Error getting Jenkins crumb: {}. Attempting job creation without crumb.",
                    e
                );
                None
            }
        };
        jenkins
            .create_item(job_name, &config_xml, crumb.as_ref())
            .await?;
        Ok(jenkins.job_url(job_name))
    }

    async fn create_tickets(
        &self,
        batch: &ReleaseBatch,
    ) -> Result<(CreatedIssue, Vec<TaskOutcome>), RelqualError> {
        let jira = self.jira.as_ref().map_err(|e| e.clone())?;

        let owners: BTreeSet<&str> = batch
            .items()
            .iter()
            .filter_map(|m| m.owner.as_deref())
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .collect();
        let mut accounts = AccountCache::new();
        for owner in owners {
            jira.find_account_id(&mut accounts, owner).await;
        }

        let epic = jira.create_epic(batch.target().as_str()).await?;

        let accounts = &accounts;
        let tasks = join_all(batch.items().iter().map(|model| {
            let account = model
                .owner
                .as_deref()
                .and_then(|o| accounts.get(o.trim()).cloned().flatten());
            let epic_key = epic.key.as_str();
            async move {
                match jira.create_task(model, epic_key, account.as_deref()).await {
                    Ok(issue) => TaskOutcome {
                        model_name: model.model_name.clone(),
                        issue: Some(issue),
                        error: None,
                    },
                    Err(e) => {
                        warn!("Jira Task creation failed for {}: {}", model.model_name, e);
                        TaskOutcome {
                            model_name: model.model_name.clone(),
                            issue: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        }))
        .await;

        Ok((epic, tasks))
    }
}
