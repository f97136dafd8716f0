//! Job status reconciliation.
//!
//! Brings stored job rows in line with what the CI server reports:
//! resolves queue items to build URLs, maps build results to statuses and
//! records a duration/timestamp message. A failure while polling one job is
//! recorded on that job and never stops the others.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::clients::{BuildInfo, JenkinsClient};
use crate::db::{job_repo, Database, DatabaseError};
use crate::error::UpstreamError;
use crate::model::{Job, JobState, JobStatus};

pub mod scheduler;

pub use scheduler::{PollConfig, PollManager, PollScheduler, StopReason};

/// Marker distinguishing queue item URLs from build URLs.
const QUEUE_MARKER: &str = "/queue/item/";

/// Failure while polling a single job.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("job has no CI URL to poll")]
    MissingUrl,

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Build info for a known build URL could not be read.
    #[error("{source}")]
    Build {
        url: String,
        #[source]
        source: UpstreamError,
    },
}

impl PollError {
    /// Build URL learned before the failure, if any.
    fn build_url(&self) -> Option<&str> {
        match self {
            PollError::Build { url, .. } => Some(url),
            _ => None,
        }
    }
}

/// Counts from one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    pub polled: usize,
    pub updated: usize,
    pub errors: usize,
    pub active_remaining: u64,
}

/// What polling one job produced.
#[derive(Debug)]
enum Observation {
    /// Queue item has not started; nothing to write.
    StillQueued,
    Observed {
        status: JobStatus,
        url: String,
        message: String,
    },
}

/// Polls the CI server for a release's active jobs and stores what it sees.
pub struct Reconciler {
    jenkins: JenkinsClient,
    db: Database,
}

impl Reconciler {
    /// Reconciler writing observed states to `db`.
    pub fn new(jenkins: JenkinsClient, db: Database) -> Self {
        Self { jenkins, db }
    }

    /// Runs one reconciliation cycle over the active jobs of a release.
    pub async fn poll_release(&self, release_id: &str) -> Result<PollSummary, DatabaseError> {
        let jobs = job_repo::list_active(&self.db, release_id)?;
        if jobs.is_empty() {
            debug!("No active jobs to poll for {}", release_id);
            return Ok(PollSummary::default());
        }

        let results = join_all(jobs.iter().map(|job| self.poll_job(job))).await;

        let mut summary = PollSummary {
            polled: jobs.len(),
            ..Default::default()
        };
        for result in results {
            match result? {
                PollResult::Unchanged => {}
                PollResult::Updated => summary.updated += 1,
                PollResult::Failed => summary.errors += 1,
            }
        }
        summary.active_remaining = job_repo::count_active(&self.db, release_id)?;

        info!(
            "Polled {} jobs for {}: {} updated, {} errors, {} still active",
            summary.polled, release_id, summary.updated, summary.errors, summary.active_remaining
        );
        Ok(summary)
    }

    async fn poll_job(&self, job: &Job) -> Result<PollResult, DatabaseError> {
        match self.observe(job).await {
            Ok(Observation::StillQueued) => {
                debug!("Job {} for {} still queued", job.id, job.model_name);
                Ok(PollResult::Unchanged)
            }
            Ok(Observation::Observed {
                status,
                url,
                message,
            }) => {
                let state = job.state.observe(status);
                job_repo::update_progress(
                    &self.db,
                    &job.id,
                    &state,
                    Some(&url),
                    &message,
                    Utc::now(),
                )?;
                Ok(PollResult::Updated)
            }
            Err(e) => {
                warn!(
                    "Polling failed for job {} ({}): {}",
                    job.id, job.model_name, e
                );
                let state = poll_failed(&job.state);
                job_repo::update_progress(
                    &self.db,
                    &job.id,
                    &state,
                    e.build_url(),
                    &format!("Polling failed: {}", e),
                    Utc::now(),
                )?;
                Ok(PollResult::Failed)
            }
        }
    }

    async fn observe(&self, job: &Job) -> Result<Observation, PollError> {
        let url = job.jenkins_url.as_deref().ok_or(PollError::MissingUrl)?;

        let build_url = if url.contains(QUEUE_MARKER) {
            let item = self.jenkins.queue_item(url).await?;
            match item.executable {
                Some(executable) => executable.url,
                None if item.cancelled => {
                    return Ok(Observation::Observed {
                        status: JobStatus::Aborted,
                        url: url.to_string(),
                        message: "Queue item was cancelled.".to_string(),
                    });
                }
                None => return Ok(Observation::StillQueued),
            }
        } else {
            url.to_string()
        };

        let info = match self.jenkins.build_info(&build_url).await {
            Ok(info) => info,
            Err(source) => {
                return Err(PollError::Build {
                    url: build_url,
                    source,
                })
            }
        };
        Ok(Observation::Observed {
            status: JobStatus::from_build(info.building, info.result.as_deref()),
            url: build_url,
            message: status_message(&info),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum PollResult {
    Unchanged,
    Updated,
    Failed,
}

/// State recorded when polling fails: POLL_ERROR for releases, FAILURE for prechecks.
fn poll_failed(state: &JobState) -> JobState {
    state.observe(JobStatus::PollError)
}

/// `Duration: {ms}ms. Last updated: {YYYY-MM-DD HH:MM:SS} UTC`.
pub fn status_message(info: &BuildInfo) -> String {
    let updated = DateTime::<Utc>::from_timestamp_millis(info.timestamp)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| info.timestamp.to_string());
    format!("Duration: {}ms. Last updated: {}", info.duration, updated)
}
