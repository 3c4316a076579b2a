//! Storage configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a write transaction's commit is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitStrategy {
    /// The committing thread writes every page and publishes the root
    /// before `commit` returns.
    #[default]
    Blocking,
    /// `commit` hands the sealed log to a background worker and returns
    /// immediately; the next write transaction may start right away.
    NonBlocking,
}

/// Settings for a [`Storage`](crate::store::Storage) instance.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Entries a transaction log keeps in memory before spilling.
    pub log_cache_capacity: usize,
    /// Directory for transaction log spill files. `None` uses the system
    /// temp directory.
    pub log_dir: Option<PathBuf>,
    pub commit_strategy: CommitStrategy,
    /// How long `close` waits for an in-flight background commit.
    pub close_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_cache_capacity: 100,
            log_dir: None,
            commit_strategy: CommitStrategy::Blocking,
            close_timeout: Duration::from_secs(300),
        }
    }
}

impl StorageConfig {
    /// Background commits with the default log sizing.
    pub fn non_blocking() -> Self {
        Self {
            commit_strategy: CommitStrategy::NonBlocking,
            ..Self::default()
        }
    }

    /// Large log cache for bulk loads that touch many pages per commit.
    pub fn bulk_load() -> Self {
        Self {
            log_cache_capacity: 10_000,
            commit_strategy: CommitStrategy::NonBlocking,
            ..Self::default()
        }
    }

    pub fn with_log_cache_capacity(mut self, capacity: usize) -> Self {
        self.log_cache_capacity = capacity;
        self
    }

    pub fn with_log_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.log_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_commit_strategy(mut self, strategy: CommitStrategy) -> Self {
        self.commit_strategy = strategy;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Resolved spill directory.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
