//! Persistence for qualification and pre-check job records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{Job, JobState, JobStatus, JobType, PrecheckStatus};

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    release_id: String,
    model_name: String,
    job_type: String,
    status: Option<String>,
    precheck_status: Option<String>,
    jenkins_url: Option<String>,
    jenkins_job_name: Option<String>,
    message: Option<String>,
    precheck_result: Option<String>,
    submitted_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            release_id: row.get("release_id")?,
            model_name: row.get("model_name")?,
            job_type: row.get("job_type")?,
            status: row.get("status")?,
            precheck_status: row.get("precheck_status")?,
            jenkins_url: row.get("jenkins_url")?,
            jenkins_job_name: row.get("jenkins_job_name")?,
            message: row.get("message")?,
            precheck_result: row.get("precheck_result")?,
            submitted_at: row.get("submitted_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_job(self) -> Result<Job, DatabaseError> {
        let corrupt = |reason: String| DatabaseError::CorruptRow {
            id: self.id.clone(),
            reason,
        };

        let job_type: JobType = self.job_type.parse().map_err(|e| corrupt(format!("{}", e)))?;
        let (state, message) = match job_type {
            JobType::Release => {
                let raw = self
                    .status
                    .as_deref()
                    .ok_or_else(|| corrupt("release job without status".to_string()))?;
                let status: JobStatus = raw.parse().map_err(|e| corrupt(format!("{}", e)))?;
                (JobState::Release { status }, self.message.clone())
            }
            JobType::Precheck => {
                let precheck_status = match self.precheck_status.as_deref() {
                    Some(raw) => raw
                        .parse::<PrecheckStatus>()
                        .map_err(|e| corrupt(format!("{}", e)))?,
                    None => PrecheckStatus::NotStarted,
                };
                (
                    JobState::Precheck { precheck_status },
                    self.precheck_result.clone(),
                )
            }
        };

        Ok(Job {
            submitted_at: parse_timestamp(&self.submitted_at, &self.id)?,
            updated_at: parse_timestamp(&self.updated_at, &self.id)?,
            id: self.id,
            release_id: self.release_id,
            model_name: self.model_name,
            state,
            jenkins_url: self.jenkins_url,
            jenkins_job_name: self.jenkins_job_name,
            message,
        })
    }
}

/// Splits a state into the `status` / `precheck_status` column pair.
fn state_columns(state: &JobState) -> (Option<&'static str>, Option<&'static str>) {
    match state {
        JobState::Release { status } => (Some(status.as_str()), None),
        JobState::Precheck { precheck_status } => (None, Some(precheck_status.as_str())),
    }
}

/// Splits a message into the `message` / `precheck_result` column pair.
fn message_columns<'a>(state: &JobState, message: Option<&'a str>) -> (Option<&'a str>, Option<&'a str>) {
    match state {
        JobState::Release { .. } => (message, None),
        JobState::Precheck { .. } => (None, message),
    }
}

fn collect_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, DatabaseError> {
    rows.into_iter().map(JobRow::into_job).collect()
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    let (status, precheck_status) = state_columns(&job.state);
    let (message, precheck_result) = message_columns(&job.state, job.message.as_deref());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, release_id, model_name, job_type, status, precheck_status,
             jenkins_url, jenkins_job_name, message, precheck_result, submitted_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id,
                job.release_id,
                job.model_name,
                job.job_type().as_str(),
                status,
                precheck_status,
                job.jenkins_url,
                job.jenkins_job_name,
                message,
                precheck_result,
                format_timestamp(job.submitted_at),
                format_timestamp(job.updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(JobRow::into_job).transpose()
}

/// Lists jobs of a release, newest first, optionally restricted to one type.
pub fn list_by_release(
    db: &Database,
    release_id: &str,
    job_type: Option<JobType>,
) -> Result<Vec<Job>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE release_id = ?1 AND (?2 IS NULL OR job_type = ?2)
             ORDER BY submitted_at DESC",
        )?;
        let rows = stmt
            .query_map(
                params![release_id, job_type.map(|t| t.as_str())],
                JobRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    collect_jobs(rows)
}

/// Lists jobs of a release that still need polling.
pub fn list_active(db: &Database, release_id: &str) -> Result<Vec<Job>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE release_id = ?1 AND (
                (job_type = 'RELEASE' AND status IN ('QUEUED', 'BUILDING'))
                OR (job_type = 'PRECHECK' AND precheck_status IN ('PENDING', 'BUILDING'))
             )
             ORDER BY submitted_at ASC",
        )?;
        let rows = stmt
            .query_map(params![release_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    collect_jobs(rows)
}

/// Counts jobs of a release that still need polling.
pub fn count_active(db: &Database, release_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE release_id = ?1 AND (
                (job_type = 'RELEASE' AND status IN ('QUEUED', 'BUILDING'))
                OR (job_type = 'PRECHECK' AND precheck_status IN ('PENDING', 'BUILDING'))
             )",
            params![release_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Records the outcome of one poll: new state, URL and diagnostic message.
///
/// The job type is fixed at insert time, so only the active status column
/// and its message column are touched.
pub fn update_progress(
    db: &Database,
    id: &str,
    state: &JobState,
    jenkins_url: Option<&str>,
    message: &str,
    updated_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let sql = match state {
        JobState::Release { .. } => {
            "UPDATE jobs SET status = ?2, jenkins_url = COALESCE(?3, jenkins_url),
             message = ?4, updated_at = ?5 WHERE id = ?1"
        }
        JobState::Precheck { .. } => {
            "UPDATE jobs SET precheck_status = ?2, jenkins_url = COALESCE(?3, jenkins_url),
             precheck_result = ?4, updated_at = ?5 WHERE id = ?1"
        }
    };
    db.with_conn(|conn| {
        conn.execute(
            sql,
            params![
                id,
                state.status_str(),
                jenkins_url,
                message,
                format_timestamp(updated_at)
            ],
        )?;
        Ok(())
    })
}

/// Latest PRECHECK status per model within a release.
pub fn latest_precheck_statuses(
    db: &Database,
    release_id: &str,
    model_names: &[String],
) -> Result<HashMap<String, PrecheckStatus>, DatabaseError> {
    let jobs = list_by_release(db, release_id, Some(JobType::Precheck))?;
    let mut latest = HashMap::new();
    // Rows arrive newest first; the first one seen per model wins.
    for job in jobs {
        if !model_names.iter().any(|m| m == &job.model_name) {
            continue;
        }
        if let JobState::Precheck { precheck_status } = job.state {
            latest.entry(job.model_name).or_insert(precheck_status);
        }
    }
    Ok(latest)
}
