use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the release store.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot prepare store location {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema upgrade to v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A row holds a value the job or release types reject, such as an
    /// unknown status string.
    #[error("unreadable row {id}: {reason}")]
    CorruptRow { id: String, reason: String },

    #[error("store connection lock poisoned by a panicked writer")]
    LockPoisoned,
}
