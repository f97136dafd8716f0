//! Release repository for the `releases` link table.

use chrono::Utc;
use rusqlite::{params, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{Release, ReleaseLinks};

struct ReleaseRow {
    release_id: String,
    jenkins_job_url: Option<String>,
    jenkins_job_name: Option<String>,
    jira_epic_key: Option<String>,
    jira_epic_url: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ReleaseRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            release_id: row.get("release_id")?,
            jenkins_job_url: row.get("jenkins_job_url")?,
            jenkins_job_name: row.get("jenkins_job_name")?,
            jira_epic_key: row.get("jira_epic_key")?,
            jira_epic_url: row.get("jira_epic_url")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_release(self) -> Result<Release, DatabaseError> {
        Ok(Release {
            created_at: parse_timestamp(&self.created_at, &self.release_id)?,
            updated_at: parse_timestamp(&self.updated_at, &self.release_id)?,
            release_id: self.release_id,
            jenkins_job_url: self.jenkins_job_url,
            jenkins_job_name: self.jenkins_job_name,
            jira_epic_key: self.jira_epic_key,
            jira_epic_url: self.jira_epic_url,
        })
    }
}

/// Inserts or updates the links of a release.
///
/// Absent links never overwrite stored ones; `created_at` is set once.
pub fn upsert(db: &Database, release_id: &str, links: &ReleaseLinks) -> Result<(), DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO releases (release_id, jenkins_job_url, jenkins_job_name,
                jira_epic_key, jira_epic_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(release_id) DO UPDATE SET
                jenkins_job_url = COALESCE(excluded.jenkins_job_url, releases.jenkins_job_url),
                jenkins_job_name = COALESCE(excluded.jenkins_job_name, releases.jenkins_job_name),
                jira_epic_key = COALESCE(excluded.jira_epic_key, releases.jira_epic_key),
                jira_epic_url = COALESCE(excluded.jira_epic_url, releases.jira_epic_url),
                updated_at = excluded.updated_at",
            params![
                release_id,
                links.jenkins_job_url,
                links.jenkins_job_name,
                links.jira_epic_key,
                links.jira_epic_url,
                now,
            ],
        )?;
        Ok(())
    })
}

/// Finds a release by id.
pub fn find(db: &Database, release_id: &str) -> Result<Option<Release>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM releases WHERE release_id = ?1")?;
        let mut rows = stmt.query_map(params![release_id], ReleaseRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(ReleaseRow::into_release).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_upsert_creates_release() {
        let db = test_db();
        let links = ReleaseLinks {
            jenkins_job_url: Some("https://ci.example.com/job/qual-r2540/".to_string()),
            jenkins_job_name: Some("qual-r2540".to_string()),
            ..Default::default()
        };
        upsert(&db, "r2540", &links).unwrap();

        let release = find(&db, "r2540").unwrap().unwrap();
        assert_eq!(release.jenkins_job_name.as_deref(), Some("qual-r2540"));
        assert!(release.jira_epic_key.is_none());
        assert_eq!(release.created_at, release.updated_at);
    }

    #[test]
    fn test_upsert_merges_links() {
        let db = test_db();
        upsert(
            &db,
            "r2540",
            &ReleaseLinks {
                jenkins_job_name: Some("qual-r2540".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let first = find(&db, "r2540").unwrap().unwrap();

        upsert(
            &db,
            "r2540",
            &ReleaseLinks {
                jira_epic_key: Some("QUAL-7".to_string()),
                jira_epic_url: Some("https://jira.example.com/browse/QUAL-7".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let release = find(&db, "r2540").unwrap().unwrap();
        assert_eq!(release.jenkins_job_name.as_deref(), Some("qual-r2540"));
        assert_eq!(release.jira_epic_key.as_deref(), Some("QUAL-7"));
        assert_eq!(release.created_at, first.created_at);
    }

    #[test]
    fn test_find_missing() {
        let db = test_db();
        assert!(find(&db, "r0000").unwrap().is_none());
    }
}
