//! Job records and their closed status enumerations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of CI work a job represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Release,
    Precheck,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Release => "RELEASE",
            JobType::Precheck => "PRECHECK",
        }
    }

    /// State a freshly queued job of this type starts in.
    pub fn queued_state(&self) -> JobState {
        match self {
            JobType::Release => JobState::Release {
                status: JobStatus::Queued,
            },
            JobType::Precheck => JobState::Precheck {
                precheck_status: PrecheckStatus::Pending,
            },
        }
    }

    /// State of a job whose submission failed.
    pub fn failed_state(&self) -> JobState {
        match self {
            JobType::Release => JobState::Release {
                status: JobStatus::Failure,
            },
            JobType::Precheck => JobState::Precheck {
                precheck_status: PrecheckStatus::Failure,
            },
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RELEASE" => Ok(JobType::Release),
            "PRECHECK" => Ok(JobType::Precheck),
            other => Err(UnknownValue::new("job type", other)),
        }
    }
}

/// Status of a RELEASE job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Building,
    Success,
    Failure,
    Aborted,
    Unknown,
    PollError,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Building => "BUILDING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::Aborted => "ABORTED",
            JobStatus::Unknown => "UNKNOWN",
            JobStatus::PollError => "POLL_ERROR",
        }
    }

    /// Maps raw build fields to a status. This is the only place upstream
    /// build results are interpreted.
    pub fn from_build(building: bool, result: Option<&str>) -> Self {
        if building {
            return JobStatus::Building;
        }
        match result {
            Some("SUCCESS") => JobStatus::Success,
            Some("FAILURE") => JobStatus::Failure,
            Some("ABORTED") => JobStatus::Aborted,
            _ => JobStatus::Unknown,
        }
    }

    /// True while the reconciler should keep polling.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Building)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "BUILDING" => Ok(JobStatus::Building),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILURE" => Ok(JobStatus::Failure),
            "ABORTED" => Ok(JobStatus::Aborted),
            "UNKNOWN" => Ok(JobStatus::Unknown),
            "POLL_ERROR" => Ok(JobStatus::PollError),
            other => Err(UnknownValue::new("job status", other)),
        }
    }
}

/// Status of a PRECHECK job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrecheckStatus {
    NotStarted,
    Pending,
    Building,
    Success,
    Failure,
    Unknown,
}

impl PrecheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecheckStatus::NotStarted => "NOT_STARTED",
            PrecheckStatus::Pending => "PENDING",
            PrecheckStatus::Building => "BUILDING",
            PrecheckStatus::Success => "SUCCESS",
            PrecheckStatus::Failure => "FAILURE",
            PrecheckStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, PrecheckStatus::Pending | PrecheckStatus::Building)
    }
}

impl From<JobStatus> for PrecheckStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => PrecheckStatus::Pending,
            JobStatus::Building => PrecheckStatus::Building,
            JobStatus::Success => PrecheckStatus::Success,
            JobStatus::Failure | JobStatus::Aborted | JobStatus::PollError => {
                PrecheckStatus::Failure
            }
            JobStatus::Unknown => PrecheckStatus::Unknown,
        }
    }
}

impl fmt::Display for PrecheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrecheckStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(PrecheckStatus::NotStarted),
            "PENDING" => Ok(PrecheckStatus::Pending),
            "BUILDING" => Ok(PrecheckStatus::Building),
            "SUCCESS" => Ok(PrecheckStatus::Success),
            "FAILURE" => Ok(PrecheckStatus::Failure),
            "UNKNOWN" => Ok(PrecheckStatus::Unknown),
            other => Err(UnknownValue::new("precheck status", other)),
        }
    }
}

/// Type-specific state of a job. Exactly one status exists per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum JobState {
    Release { status: JobStatus },
    Precheck { precheck_status: PrecheckStatus },
}

impl JobState {
    pub fn job_type(&self) -> JobType {
        match self {
            JobState::Release { .. } => JobType::Release,
            JobState::Precheck { .. } => JobType::Precheck,
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            JobState::Release { status } => status.is_active(),
            JobState::Precheck { precheck_status } => precheck_status.is_active(),
        }
    }

    /// Applies an observed CI status to this job's type.
    pub fn observe(&self, observed: JobStatus) -> JobState {
        match self {
            JobState::Release { .. } => JobState::Release { status: observed },
            JobState::Precheck { .. } => JobState::Precheck {
                precheck_status: observed.into(),
            },
        }
    }

    /// Status string of the active field.
    pub fn status_str(&self) -> &'static str {
        match self {
            JobState::Release { status } => status.as_str(),
            JobState::Precheck { precheck_status } => precheck_status.as_str(),
        }
    }
}

/// One submitted unit of CI work for one model within one release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub release_id: String,
    pub model_name: String,
    #[serde(flatten)]
    pub state: JobState,
    /// Queue URL until the build starts, then the build URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jenkins_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jenkins_job_name: Option<String>,
    /// Diagnostic text; stored as `message` or `precheckResult` depending on type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new job record with a fresh id.
    pub fn new(release_id: &str, model_name: &str, state: JobState) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            release_id: release_id.to_string(),
            model_name: model_name.to_string(),
            state,
            jenkins_url: None,
            jenkins_job_name: None,
            message: None,
            submitted_at: now,
            updated_at: now,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.state.job_type()
    }
}

/// A stored value that does not belong to its enumeration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} '{value}'")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_build_building_wins() {
        assert_eq!(JobStatus::from_build(true, Some("SUCCESS")), JobStatus::Building);
    }

    #[test]
    fn test_from_build_results() {
        assert_eq!(JobStatus::from_build(false, Some("SUCCESS")), JobStatus::Success);
        assert_eq!(JobStatus::from_build(false, Some("FAILURE")), JobStatus::Failure);
        assert_eq!(JobStatus::from_build(false, Some("ABORTED")), JobStatus::Aborted);
        assert_eq!(JobStatus::from_build(false, Some("UNSTABLE")), JobStatus::Unknown);
        assert_eq!(JobStatus::from_build(false, None), JobStatus::Unknown);
    }

    #[test]
    fn test_status_strings_parse_back() {
        for status in [
            JobStatus::Queued,
            JobStatus::Building,
            JobStatus::Success,
            JobStatus::Failure,
            JobStatus::Aborted,
            JobStatus::Unknown,
            JobStatus::PollError,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_precheck_mapping() {
        assert_eq!(PrecheckStatus::from(JobStatus::Aborted), PrecheckStatus::Failure);
        assert_eq!(PrecheckStatus::from(JobStatus::Building), PrecheckStatus::Building);
        assert_eq!(PrecheckStatus::from(JobStatus::Unknown), PrecheckStatus::Unknown);
    }

    #[test]
    fn test_active_states() {
        assert!(JobType::Release.queued_state().is_active());
        assert!(JobType::Precheck.queued_state().is_active());
        assert!(!JobType::Release.failed_state().is_active());
        assert!(!JobState::Release {
            status: JobStatus::PollError
        }
        .is_active());
        assert!(!JobState::Precheck {
            precheck_status: PrecheckStatus::NotStarted
        }
        .is_active());
    }

    #[test]
    fn test_observe_keeps_job_type() {
        let precheck = JobType::Precheck.queued_state();
        assert_eq!(
            precheck.observe(JobStatus::Success),
            JobState::Precheck {
                precheck_status: PrecheckStatus::Success
            }
        );
    }

    #[test]
    fn test_job_serializes_active_status_only() {
        let job = Job::new("r2540", "llama", JobType::Release.queued_state());
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "RELEASE");
        assert_eq!(value["status"], "QUEUED");
        assert!(value.get("precheckStatus").is_none());
        assert_eq!(value["releaseId"], "r2540");

        let job = Job::new("r2540", "llama", JobType::Precheck.queued_state());
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "PRECHECK");
        assert_eq!(value["precheckStatus"], "PENDING");
        assert!(value.get("status").is_none());
    }
}
