//! Batch submission of qualification builds.
//!
//! One crumb is fetched per batch, then every item is submitted in order.
//! Each item yields exactly one persisted job row whatever the outcome.

use log::{error, info, warn};
use serde::Serialize;

use crate::clients::{Crumb, JenkinsClient};
use crate::config::JobNaming;
use crate::db::{job_repo, Database};
use crate::model::{Job, JobState, JobType, ModelRelease, ReleaseBatch};

mod params;

pub use params::build_parameters;

/// Per-item result of a trigger call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDetail {
    pub job_id: String,
    pub model_name: String,
    #[serde(flatten)]
    pub state: JobState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// `false` when the job row could not be written.
    pub recorded: bool,
}

impl TriggerDetail {
    pub fn queued(&self) -> bool {
        self.state.is_active()
    }
}

/// Aggregate result of a trigger call.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerOutcome {
    pub success: bool,
    pub message: String,
    pub details: Vec<TriggerDetail>,
}

/// Submits batches of model builds to the CI server.
pub struct JobTrigger {
    jenkins: JenkinsClient,
    db: Database,
    naming: JobNaming,
}

impl JobTrigger {
    /// `naming` decides which CI job each job type is submitted to.
    pub fn new(jenkins: JenkinsClient, db: Database, naming: JobNaming) -> Self {
        Self { jenkins, db, naming }
    }

    /// CI job that runs builds of `job_type` for `batch`.
    pub fn job_name(&self, batch: &ReleaseBatch, job_type: JobType) -> String {
        match job_type {
            JobType::Release => self.naming.release_job_name(batch.target().as_str()),
            JobType::Precheck => self.naming.precheck_job_name.clone(),
        }
    }

    /// Submits every item of the batch and records one job per item.
    ///
    /// A store failure marks that item unrecorded; later items are still
    /// submitted.
    pub async fn trigger(&self, batch: &ReleaseBatch, job_type: JobType) -> TriggerOutcome {
        let job_name = self.job_name(batch, job_type);
        info!(
            "Triggering {} {} jobs on '{}' for {}",
            batch.len(),
            job_type,
            job_name,
            batch.target()
        );

        let crumb = match self.jenkins.crumb().await {
            Ok(crumb) => Ok(crumb),
            Err(e) => {
                error!("Error getting Jenkins crumb: {}", e);
                Err(format!("Error getting Jenkins crumb: {}", e))
            }
        };

        let mut details = Vec::with_capacity(batch.len());
        for item in batch.items() {
            let mut job = Job::new(
                batch.target().as_str(),
                item.model_name.trim(),
                job_type.queued_state(),
            );
            job.jenkins_job_name = Some(job_name.clone());

            let submitted = match &crumb {
                Err(message) => Err(message.clone()),
                Ok(crumb) => self.submit(&job_name, item, crumb.as_ref()).await,
            };

            match submitted {
                Ok(queue_url) => {
                    info!("Queued {} for {} at {}", job_name, item.model_name, queue_url);
                    job.jenkins_url = Some(queue_url);
                    job.message = Some("Job is queued.".to_string());
                }
                Err(message) => {
                    warn!("Failed to queue {} for {}: {}", job_name, item.model_name, message);
                    job.state = job_type.failed_state();
                    job.message = Some(message);
                }
            }

            let recorded = match job_repo::insert(&self.db, &job) {
                Ok(()) => true,
                Err(e) => {
                    error!("Could not record job for {}: {}", item.model_name, e);
                    job.message = Some(format!(
                        "{} Job record not saved: {}",
                        job.message.unwrap_or_default(),
                        e
                    ));
                    false
                }
            };
            details.push(TriggerDetail {
                job_id: job.id,
                model_name: job.model_name,
                state: job.state,
                message: job.message.unwrap_or_default(),
                url: job.jenkins_url,
                recorded,
            });
        }

        let queued = details.iter().filter(|d| d.queued()).count();
        let unrecorded = details.iter().filter(|d| !d.recorded).count();
        let mut message = format!("{} of {} jobs queued", queued, details.len());
        if unrecorded > 0 {
            message.push_str(&format!(", {} not recorded", unrecorded));
        }
        TriggerOutcome {
            success: queued == details.len() && unrecorded == 0,
            message,
            details,
        }
    }

    async fn submit(
        &self,
        job_name: &str,
        item: &ModelRelease,
        crumb: Option<&Crumb>,
    ) -> Result<String, String> {
        let params = build_parameters(item, job_name);
        self.jenkins
            .build_with_parameters(job_name, &params, crumb)
            .await
            .map_err(|e| format!("Failed to trigger job: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JenkinsSettings;
    use crate::model::{JobStatus, PrecheckStatus};
    use secrecy::SecretString;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item(name: &str) -> ModelRelease {
        ModelRelease {
            model_name: name.to_string(),
            owner: None,
            branch: "release/2.5".to_string(),
            app_tag: "app-2.5.0".to_string(),
            miq_branch: "main".to_string(),
            profile: String::new(),
            labels: "qual".to_string(),
            release_target: "r2540".to_string(),
            multibox: None,
            usernode: None,
            monitor_link: None,
        }
    }

    fn trigger(server: &MockServer, db: &Database) -> JobTrigger {
        let settings = JenkinsSettings {
            url: Some(server.uri()),
            username: Some("ci-bot".to_string()),
            api_token: Some(SecretString::from("s3cret".to_string())),
            ..Default::default()
        };
        let jenkins = JenkinsClient::new(reqwest::Client::new(), &settings).unwrap();
        JobTrigger::new(jenkins, db.clone(), JobNaming::default())
    }

    #[tokio::test]
    async fn test_crumb_failure_fails_every_item_but_records_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crumbIssuer/api/json"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let db = Database::open_in_memory().unwrap();
        let batch = ReleaseBatch::new(vec![item("a"), item("b")]).unwrap();
        let outcome = trigger(&server, &db)
            .trigger(&batch, JobType::Release)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "0 of 2 jobs queued");
        for detail in &outcome.details {
            assert_eq!(
                detail.state,
                JobState::Release {
                    status: JobStatus::Failure
                }
            );
            assert!(detail.message.starts_with("Error getting Jenkins crumb"));
        }
        assert_eq!(job_repo::list_by_release(&db, "r2540", None).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_precheck_uses_fixed_job_and_pending_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crumbIssuer/api/json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/job/csx-inference-model-qual-v2/buildWithParameters"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", format!("{}/queue/item/5/", server.uri()).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let db = Database::open_in_memory().unwrap();
        let batch = ReleaseBatch::new(vec![item("a")]).unwrap();
        let outcome = trigger(&server, &db)
            .trigger(&batch, JobType::Precheck)
            .await;

        assert!(outcome.success);
        let jobs = job_repo::list_by_release(&db, "r2540", Some(JobType::Precheck)).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs[0].state,
            JobState::Precheck {
                precheck_status: PrecheckStatus::Pending
            }
        );
        assert_eq!(
            jobs[0].jenkins_job_name.as_deref(),
            Some("csx-inference-model-qual-v2")
        );
    }

    #[tokio::test]
    async fn test_html_error_page_reported_as_internal_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crumbIssuer/api/json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500).set_body_string("<!DOCTYPE html><html>trace</html>"),
            )
            .mount(&server)
            .await;

        let db = Database::open_in_memory().unwrap();
        let batch = ReleaseBatch::new(vec![item("a")]).unwrap();
        let outcome = trigger(&server, &db)
            .trigger(&batch, JobType::Release)
            .await;

        assert!(!outcome.success);
        assert!(outcome.details[0]
            .message
            .contains("Jenkins Internal Server Error"));
        assert!(!outcome.details[0].message.contains("<html>"));
    }

    #[tokio::test]
    async fn test_store_failure_does_not_abort_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crumbIssuer/api/json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/job/csx-inference-release-qual-r2540/buildWithParameters"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", format!("{}/queue/item/6/", server.uri()).as_str()),
            )
            .expect(3)
            .mount(&server)
            .await;

        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_b BEFORE INSERT ON jobs WHEN NEW.model_name = 'b'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        let batch = ReleaseBatch::new(vec![item("a"), item("b"), item("c")]).unwrap();
        let outcome = trigger(&server, &db)
            .trigger(&batch, JobType::Release)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "3 of 3 jobs queued, 1 not recorded");
        let recorded: Vec<bool> = outcome.details.iter().map(|d| d.recorded).collect();
        assert_eq!(recorded, vec![true, false, true]);
        assert!(outcome.details[1].message.contains("disk full"));
        assert!(outcome.details[1].url.is_some());

        let rows = job_repo::list_by_release(&db, "r2540", None).unwrap();
        let mut models: Vec<&str> = rows.iter().map(|j| j.model_name.as_str()).collect();
        models.sort();
        assert_eq!(models, vec!["a", "c"]);
    }
}
