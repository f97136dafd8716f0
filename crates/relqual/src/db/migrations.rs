//! Schema upgrades for the release store.
//!
//! Each step runs inside its own transaction and is recorded in
//! `schema_history`, so a store opened by an older build picks up only
//! the steps it has not seen.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

/// One schema step, applied once in version order.
struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "jobs",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Step {
        version: 2,
        name: "releases",
        sql: include_str!("sql/002_create_releases.sql"),
    },
];

const HISTORY_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_history (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Brings the store up to the latest schema version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(HISTORY_DDL)?;
    let applied = schema_version(conn)?;

    for step in STEPS.iter().filter(|s| s.version > applied) {
        apply(conn, step).map_err(|e| DatabaseError::Migration {
            version: step.version,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// Highest schema version recorded in the store, 0 for a fresh file.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_history",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn apply(conn: &Connection, step: &Step) -> rusqlite::Result<()> {
    log::info!("applying schema v{} ({})", step.version, step.name);
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(step.sql)?;
    tx.execute(
        "INSERT INTO schema_history (version, name) VALUES (?1, ?2)",
        params![step.version, step.name],
    )?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latest() -> u32 {
        STEPS.last().map(|s| s.version).unwrap_or(0)
    }

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_table_info(?1)")
            .unwrap();
        let names = stmt
            .query_map([table], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        names
    }

    #[test]
    fn test_fresh_store_reaches_latest_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).ok(), None);

        run_all(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), latest());
        assert!(columns(&conn, "jobs").contains(&"jenkins_job_name".to_string()));
        assert!(columns(&conn, "releases").contains(&"jira_epic_url".to_string()));
    }

    #[test]
    fn test_rerun_records_each_step_once() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let rows: u32 = conn
            .query_row("SELECT COUNT(*) FROM schema_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows as usize, STEPS.len());
    }

    #[test]
    fn test_failed_step_reports_version_and_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        // Indexing a view fails, so step 1 errors after CREATE TABLE is skipped.
        conn.execute_batch("CREATE VIEW jobs AS SELECT 1 AS release_id;")
            .unwrap();

        match run_all(&conn) {
            Err(DatabaseError::Migration { version, .. }) => assert_eq!(version, 1),
            other => panic!("expected migration error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }
}
