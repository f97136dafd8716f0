//! Local release store.
//!
//! Job records and per-release metadata live in one SQLite file. The
//! [`Database`] handle is shared by the trigger engine, the poll
//! scheduler and the initializer; every call takes the connection lock
//! for the duration of one closure.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod release_repo;

pub use error::DatabaseError;

/// Shared handle to the store. Clones point at the same connection.
///
/// Row writes are independent single statements, so two pollers updating
/// the same job race with last-write-wins.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the store at `path`, creating parent directories and the
    /// file as needed, and upgrades the schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = dir {
            std::fs::create_dir_all(dir).map_err(|source| DatabaseError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("journal mode {}", mode);
        let db = Self::prepare(conn)?;
        log::info!("release store ready at {}", path.display());
        Ok(db)
    }

    /// Private store for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the connection locked.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let guard = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&guard)
    }
}

/// `~/.relqual/data/relqual.db`, or `None` without a home directory.
pub fn default_database_path() -> Option<PathBuf> {
    let mut path = dirs::home_dir()?;
    path.extend([".relqual", "data", "relqual.db"]);
    Some(path)
}

pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parses a stored RFC 3339 column; `id` names the row in the error.
pub(crate) fn parse_timestamp(s: &str, id: &str) -> Result<DateTime<Utc>, DatabaseError> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(e) => Err(DatabaseError::CorruptRow {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", s, e),
        }),
    }
}
