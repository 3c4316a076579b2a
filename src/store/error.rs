//! Error type shared by the storage engine.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use super::StorageKey;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Database is corrupted: {0}")]
    Corrupted(&'static str),
    #[error("Page not found: {0}")]
    PageNotFound(StorageKey),
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),
    #[error("Sequence number {0} is outside the addressable range")]
    OutOfRange(u64),
    #[error("Revision {0} does not exist")]
    RevisionNotFound(u64),
    #[error("Another write transaction is active")]
    WriterActive,
    #[error("Integrity hash mismatch for {key}")]
    HashMismatch { key: StorageKey },
    #[error("Commit failed: {0}")]
    CommitFailed(#[source] Arc<DbError>),
    #[error("Storage is closed")]
    Closed,
}

impl DbError {
    pub(crate) fn inconsistent(msg: impl Into<String>) -> Self {
        DbError::InconsistentState(msg.into())
    }

    pub(crate) fn timed_out(msg: &str) -> Self {
        DbError::Io(io::Error::new(io::ErrorKind::TimedOut, msg.to_string()))
    }

    /// Returns true if this error is a timeout surfaced as an I/O failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DbError::Io(e) if e.kind() == io::ErrorKind::TimedOut)
    }
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;
