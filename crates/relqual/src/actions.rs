//! Guarded entry points.
//!
//! Every action validates its input, builds the collaborators it needs from
//! [`Settings`] and reports the outcome as an [`ActionResponse`]. Actions
//! never return errors; failures become `success: false` with a message.

use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info};
use reqwest::Client;
use serde::Serialize;

use crate::clients::{http_client, DashboardClient, JenkinsClient, ReleaseRoster};
use crate::config::Settings;
use crate::db::{job_repo, release_repo, Database};
use crate::error::Result;
use crate::init::{CheckOutcome, InitReport, Initializer};
use crate::model::{Job, JobType, ModelRelease, PrecheckStatus, Release, ReleaseBatch, ReleaseId};
use crate::reconcile::{PollConfig, PollManager, PollSummary, Reconciler};
use crate::trigger::{JobTrigger, TriggerOutcome};

/// Uniform result shape of every action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ActionResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        let message = message.into();
        error!("{}", message);
        Self {
            success: false,
            message,
            data: None,
        }
    }

    /// A completed call whose payload reports its own partial failure.
    fn with_outcome(success: bool, message: impl Into<String>, data: T) -> Self {
        Self {
            success,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Entry points used by the CLI. Every call returns an [`ActionResponse`].
pub struct Actions {
    settings: Settings,
    db: Database,
    http: Client,
    polls: Option<Arc<PollManager>>,
}

impl Actions {
    /// Builds the shared HTTP client from the runtime settings.
    pub fn new(settings: Settings, db: Database) -> Result<Self> {
        let http = http_client(settings.runtime.http_timeout)?;
        Ok(Self {
            settings,
            db,
            http,
            polls: None,
        })
    }

    /// Starts background polling for releases after a successful trigger.
    pub fn with_poll_manager(mut self, polls: Arc<PollManager>) -> Self {
        self.polls = Some(polls);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Builds a reconciler from the Jenkins settings.
    pub fn reconciler(&self) -> Result<Reconciler> {
        let jenkins = JenkinsClient::new(self.http.clone(), &self.settings.jenkins)?;
        Ok(Reconciler::new(jenkins, self.db.clone()))
    }

    /// Builds a poll manager using the configured interval and idle limit.
    pub fn poll_manager(&self) -> Result<PollManager> {
        Ok(PollManager::new(
            Arc::new(self.reconciler()?),
            self.db.clone(),
            PollConfig::from(&self.settings.runtime),
        ))
    }

    pub async fn trigger_release_jobs(
        &self,
        releases: Vec<ModelRelease>,
    ) -> ActionResponse<TriggerOutcome> {
        self.trigger_jobs(releases, JobType::Release).await
    }

    pub async fn trigger_precheck_jobs(
        &self,
        releases: Vec<ModelRelease>,
    ) -> ActionResponse<TriggerOutcome> {
        self.trigger_jobs(releases, JobType::Precheck).await
    }

    async fn trigger_jobs(
        &self,
        releases: Vec<ModelRelease>,
        job_type: JobType,
    ) -> ActionResponse<TriggerOutcome> {
        let batch = match ReleaseBatch::new(releases) {
            Ok(batch) => batch,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        let target = batch.target().clone();

        if let Err(message) = self.ensure_dashboard_initialized(&target).await {
            return ActionResponse::fail(message);
        }

        let jenkins = match JenkinsClient::new(self.http.clone(), &self.settings.jenkins) {
            Ok(jenkins) => jenkins,
            Err(e) => {
                return ActionResponse::fail(format!("Jenkins is not configured: {}", e));
            }
        };
        let trigger = JobTrigger::new(jenkins, self.db.clone(), self.settings.jenkins.naming.clone());

        let outcome = trigger.trigger(&batch, job_type).await;

        if outcome.details.iter().any(|d| d.queued()) {
            if let Some(polls) = &self.polls {
                match polls.watch(target.as_str()) {
                    Ok(true) => info!("Started polling {}", target),
                    Ok(false) => {}
                    Err(e) => error!("Could not start polling {}: {}", target, e),
                }
            }
        }

        ActionResponse::with_outcome(outcome.success, outcome.message.clone(), outcome)
    }

    async fn ensure_dashboard_initialized(&self, target: &ReleaseId) -> std::result::Result<(), String> {
        let dashboard = DashboardClient::new(self.http.clone(), &self.settings.dashboard)
            .map_err(|e| format!("Dashboard is not configured: {}", e))?;
        match dashboard.is_initialized(target.as_str()).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!(
                "Dashboard is not initialized for release: {}. Please initialize the dashboard first.",
                target
            )),
            Err(e) => Err(format!("Dashboard check failed: {}", e)),
        }
    }

    /// Runs one reconciliation cycle for a release.
    pub async fn check_job_status(&self, release_id: &str) -> ActionResponse<PollSummary> {
        let release_id = match ReleaseId::parse(release_id) {
            Ok(id) => id,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        let reconciler = match self.reconciler() {
            Ok(reconciler) => reconciler,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        match reconciler.poll_release(release_id.as_str()).await {
            Ok(summary) if summary.polled == 0 => {
                ActionResponse::ok("No active jobs to poll.", summary)
            }
            Ok(summary) => ActionResponse::ok(format!("Polled {} jobs.", summary.polled), summary),
            Err(e) => ActionResponse::fail(format!("Polling {} failed: {}", release_id, e)),
        }
    }

    /// Jobs of a release, newest first.
    pub fn jobs_for_release(
        &self,
        release_id: &str,
        job_type: Option<JobType>,
    ) -> ActionResponse<Vec<Job>> {
        let release_id = match ReleaseId::parse(release_id) {
            Ok(id) => id,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        match job_repo::list_by_release(&self.db, release_id.as_str(), job_type) {
            Ok(jobs) => ActionResponse::ok(format!("{} jobs", jobs.len()), jobs),
            Err(e) => ActionResponse::fail(format!("Failed to load jobs: {}", e)),
        }
    }

    /// Latest pre-check status for each of the given models.
    pub fn precheck_status_for_models(
        &self,
        release_id: &str,
        model_names: &[String],
    ) -> ActionResponse<HashMap<String, PrecheckStatus>> {
        let release_id = match ReleaseId::parse(release_id) {
            Ok(id) => id,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        match job_repo::latest_precheck_statuses(&self.db, release_id.as_str(), model_names) {
            Ok(statuses) => ActionResponse::ok(
                format!("{} of {} models have pre-checks", statuses.len(), model_names.len()),
                statuses,
            ),
            Err(e) => ActionResponse::fail(format!("Failed to load pre-check statuses: {}", e)),
        }
    }

    pub async fn check_initialization(&self, target: &str) -> ActionResponse<CheckOutcome> {
        let target = match ReleaseId::parse(target) {
            Ok(id) => id,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        let initializer = match self.initializer() {
            Ok(initializer) => initializer,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        match initializer.check(&target).await {
            Ok(outcome) => {
                let message = if outcome.already_initialized {
                    format!("Release {} is already initialized.", target)
                } else {
                    format!("Release {} is not initialized.", target)
                };
                ActionResponse::ok(message, outcome)
            }
            Err(e) => ActionResponse::fail(format!("Dashboard check failed: {}", e)),
        }
    }

    pub async fn initialize_release(
        &self,
        releases: Vec<ModelRelease>,
        user_name: &str,
    ) -> ActionResponse<InitReport> {
        let batch = match ReleaseBatch::new(releases) {
            Ok(batch) => batch,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        let initializer = match self.initializer() {
            Ok(initializer) => initializer,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        let report = initializer.run(&batch, user_name).await;
        ActionResponse::with_outcome(report.success, report.message.clone(), report)
    }

    /// Adds or updates models on an already initialized dashboard release.
    pub async fn edit_dashboard(
        &self,
        releases: Vec<ModelRelease>,
        user_name: &str,
    ) -> ActionResponse<ReleaseRoster> {
        let batch = match ReleaseBatch::new(releases) {
            Ok(batch) => batch,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        let initializer = match self.initializer() {
            Ok(initializer) => initializer,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        match initializer.edit_dashboard(&batch, user_name).await {
            Ok(roster) => ActionResponse::ok(
                format!(
                    "Dashboard for {} now tracks {} models.",
                    roster.release,
                    roster.models.len()
                ),
                roster,
            ),
            Err(e) => ActionResponse::fail(format!("Dashboard edit failed: {}", e)),
        }
    }

    /// Stored CI and Jira links of a release.
    pub fn release_links(&self, release_id: &str) -> ActionResponse<Release> {
        let release_id = match ReleaseId::parse(release_id) {
            Ok(id) => id,
            Err(e) => return ActionResponse::fail(e.to_string()),
        };
        match release_repo::find(&self.db, release_id.as_str()) {
            Ok(Some(release)) => ActionResponse::ok(format!("Release {}", release_id), release),
            Ok(None) => ActionResponse::fail(format!("No release record for {}", release_id)),
            Err(e) => ActionResponse::fail(format!("Failed to load release: {}", e)),
        }
    }

    fn initializer(&self) -> Result<Initializer> {
        Ok(Initializer::new(
            &self.settings,
            self.http.clone(),
            self.db.clone(),
        )?)
    }
}
