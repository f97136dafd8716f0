//! Periodic polling of a release's active jobs.
//!
//! A [`PollScheduler`] owns one tokio task per release. It reconciles on
//! every tick and stops by itself after a number of consecutive cycles with
//! no active jobs left. [`PollManager`] keeps at most one scheduler per
//! release.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::Reconciler;
use crate::config::RuntimeSettings;
use crate::db::{job_repo, Database, DatabaseError};

/// Timing of a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Consecutive cycles without active jobs before the loop ends.
    pub idle_polls_before_stop: u32,
}

impl From<&RuntimeSettings> for PollConfig {
    fn from(runtime: &RuntimeSettings) -> Self {
        Self {
            interval: runtime.poll_interval,
            idle_polls_before_stop: runtime.idle_polls_before_stop.max(1),
        }
    }
}

/// Why a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every job reached a terminal state.
    Idle { cycles: u64 },
    /// `stop()` was called.
    Stopped,
}

/// Poll loop for one release. Dropping the handle also ends the loop.
pub struct PollScheduler {
    release_id: String,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<StopReason>,
}

impl PollScheduler {
    /// Starts polling `release_id` immediately and then on every interval tick.
    pub fn start(reconciler: Arc<Reconciler>, release_id: &str, config: PollConfig) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task_release = release_id.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut idle_polls = 0u32;
            let mut cycles = 0u64;

            log::info!(
                "Started polling {} every {:?}",
                task_release,
                config.interval
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {},
                    _ = stop_rx.changed() => {
                        log::info!("Polling for {} stopped", task_release);
                        return StopReason::Stopped;
                    }
                }

                cycles += 1;
                match reconciler.poll_release(&task_release).await {
                    Ok(summary) if summary.active_remaining == 0 => {
                        idle_polls += 1;
                        log::debug!(
                            "No active jobs for {} ({}/{})",
                            task_release,
                            idle_polls,
                            config.idle_polls_before_stop
                        );
                    }
                    Ok(_) => idle_polls = 0,
                    Err(e) => {
                        log::error!("Poll cycle for {} failed: {}", task_release, e);
                        idle_polls = 0;
                    }
                }

                if idle_polls >= config.idle_polls_before_stop {
                    log::info!(
                        "All jobs for {} are terminal, stopping after {} cycles",
                        task_release,
                        cycles
                    );
                    return StopReason::Idle { cycles };
                }
            }
        });

        Self {
            release_id: release_id.to_string(),
            stop_tx,
            handle,
        }
    }

    pub fn release_id(&self) -> &str {
        &self.release_id
    }

    /// Signals the loop to stop at its next await point.
    pub fn stop(&self) {
        // The receiver is gone only if the task already ended.
        let _ = self.stop_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the loop to end. `None` if the task panicked or was aborted.
    pub async fn join(self) -> Option<StopReason> {
        self.handle.await.ok()
    }
}

/// Keeps at most one running [`PollScheduler`] per release.
pub struct PollManager {
    reconciler: Arc<Reconciler>,
    db: Database,
    config: PollConfig,
    schedulers: Mutex<HashMap<String, PollScheduler>>,
}

impl PollManager {
    /// `db` is consulted to skip releases with nothing active.
    pub fn new(reconciler: Arc<Reconciler>, db: Database, config: PollConfig) -> Self {
        Self {
            reconciler,
            db,
            config,
            schedulers: Mutex::new(HashMap::new()),
        }
    }

    fn schedulers(&self) -> MutexGuard<'_, HashMap<String, PollScheduler>> {
        let mut schedulers = self
            .schedulers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        schedulers.retain(|_, s| !s.is_finished());
        schedulers
    }

    /// Starts polling a release if it has active jobs and is not already watched.
    ///
    /// Returns `true` when a new scheduler was started.
    pub fn watch(&self, release_id: &str) -> Result<bool, DatabaseError> {
        let mut schedulers = self.schedulers();
        if schedulers.contains_key(release_id) {
            log::debug!("Release {} is already being polled", release_id);
            return Ok(false);
        }
        if job_repo::count_active(&self.db, release_id)? == 0 {
            log::debug!("Release {} has no active jobs, not polling", release_id);
            return Ok(false);
        }

        let scheduler = PollScheduler::start(Arc::clone(&self.reconciler), release_id, self.config);
        schedulers.insert(release_id.to_string(), scheduler);
        Ok(true)
    }

    pub fn is_watching(&self, release_id: &str) -> bool {
        self.schedulers().contains_key(release_id)
    }

    /// Stops polling a release. Returns `false` if it was not being polled.
    pub fn stop(&self, release_id: &str) -> bool {
        match self.schedulers().remove(release_id) {
            Some(scheduler) => {
                scheduler.stop();
                true
            }
            None => false,
        }
    }

    /// Stops every running scheduler.
    pub fn stop_all(&self) {
        for (_, scheduler) in self.schedulers().drain() {
            scheduler.stop();
        }
    }

    /// Removes and returns the scheduler of a release, for callers that
    /// want to await its end.
    pub fn take(&self, release_id: &str) -> Option<PollScheduler> {
        self.schedulers().remove(release_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::JenkinsClient;
    use crate::config::JenkinsSettings;
    use crate::model::{Job, JobType};
    use secrecy::SecretString;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(20),
            idle_polls_before_stop: 3,
        }
    }

    fn reconciler(base_url: &str, db: &Database) -> Arc<Reconciler> {
        let settings = JenkinsSettings {
            url: Some(base_url.to_string()),
            username: Some("ci-bot".to_string()),
            api_token: Some(SecretString::from("s3cret".to_string())),
            ..Default::default()
        };
        let jenkins = JenkinsClient::new(reqwest::Client::new(), &settings).unwrap();
        Arc::new(Reconciler::new(jenkins, db.clone()))
    }

    #[test]
    fn test_config_from_runtime() {
        let runtime = RuntimeSettings::default();
        let config = PollConfig::from(&runtime);
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.idle_polls_before_stop, 3);
    }

    #[tokio::test]
    async fn test_stops_after_idle_polls() {
        let db = Database::open_in_memory().unwrap();
        let scheduler = PollScheduler::start(
            reconciler("http://127.0.0.1:9", &db),
            "r2540",
            config(),
        );

        let reason = tokio::time::timeout(Duration::from_secs(5), scheduler.join())
            .await
            .expect("scheduler should stop on its own");
        assert_eq!(reason, Some(StopReason::Idle { cycles: 3 }));
    }

    #[tokio::test]
    async fn test_idle_count_starts_after_last_active_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/x/2/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "building": true, "duration": 0, "timestamp": 1700000000000i64
            })))
            .up_to_n_times(4)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/job/x/2/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "building": false, "result": "SUCCESS", "duration": 500, "timestamp": 1700000000000i64
            })))
            .mount(&server)
            .await;

        let db = Database::open_in_memory().unwrap();
        let mut job = Job::new("r2540", "llama", JobType::Release.queued_state());
        job.jenkins_url = Some(format!("{}/job/x/2/", server.uri()));
        job_repo::insert(&db, &job).unwrap();

        let scheduler = PollScheduler::start(reconciler(&server.uri(), &db), "r2540", config());
        let reason = tokio::time::timeout(Duration::from_secs(5), scheduler.join())
            .await
            .expect("scheduler should stop once the build finishes");

        // Four building cycles, one cycle that sees SUCCESS, then two more idle ones.
        assert_eq!(reason, Some(StopReason::Idle { cycles: 7 }));
        assert_eq!(server.received_requests().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_stop_signal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/x/1/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "building": true, "duration": 0, "timestamp": 1700000000000i64
            })))
            .mount(&server)
            .await;

        let db = Database::open_in_memory().unwrap();
        let mut job = Job::new("r2540", "llama", JobType::Release.queued_state());
        job.jenkins_url = Some(format!("{}/job/x/1/", server.uri()));
        job_repo::insert(&db, &job).unwrap();

        let scheduler = PollScheduler::start(reconciler(&server.uri(), &db), "r2540", config());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!scheduler.is_finished());
        scheduler.stop();

        let reason = tokio::time::timeout(Duration::from_secs(5), scheduler.join())
            .await
            .unwrap();
        assert_eq!(reason, Some(StopReason::Stopped));
    }

    #[tokio::test]
    async fn test_manager_single_scheduler_per_release() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/x/1/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "building": true, "duration": 0, "timestamp": 1700000000000i64
            })))
            .mount(&server)
            .await;

        let db = Database::open_in_memory().unwrap();
        let manager = PollManager::new(reconciler(&server.uri(), &db), db.clone(), config());
        assert!(!manager.watch("r2540").unwrap(), "no active jobs yet");

        let mut job = Job::new("r2540", "llama", JobType::Release.queued_state());
        job.jenkins_url = Some(format!("{}/job/x/1/", server.uri()));
        job_repo::insert(&db, &job).unwrap();

        assert!(manager.watch("r2540").unwrap());
        assert!(!manager.watch("r2540").unwrap());
        assert!(manager.is_watching("r2540"));

        assert!(manager.stop("r2540"));
        assert!(!manager.is_watching("r2540"));
        assert!(!manager.stop("r2540"));
    }
}
