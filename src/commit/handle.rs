//! CommitHandle - Completion ticket for a submitted commit.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::merkle::Hash;
use crate::store::{DbError, Result, StorageKey};

/// Summary of a published revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub revision: u64,
    pub pages_written: usize,
    pub bytes_written: u64,
    pub root_key: StorageKey,
    pub root_hash: Hash,
}

type Outcome = std::result::Result<CommitInfo, Arc<DbError>>;

struct HandleState {
    revision: u64,
    result: Mutex<Option<Outcome>>,
    cv: Condvar,
}

/// Handle to a commit that may still be running.
///
/// Cloning the handle is cheap; every clone observes the same outcome.
#[derive(Clone)]
pub struct CommitHandle {
    state: Arc<HandleState>,
}

impl CommitHandle {
    pub(crate) fn pending(revision: u64) -> Self {
        Self {
            state: Arc::new(HandleState {
                revision,
                result: Mutex::new(None),
                cv: Condvar::new(),
            }),
        }
    }

    pub(crate) fn completed(info: CommitInfo) -> Self {
        let handle = Self::pending(info.revision);
        handle.finish(Ok(info));
        handle
    }

    pub(crate) fn finish(&self, outcome: Result<CommitInfo>) {
        let mut result = self.state.result.lock();
        if result.is_none() {
            *result = Some(outcome.map_err(Arc::new));
            self.state.cv.notify_all();
        }
    }

    /// Revision this commit produces.
    pub fn revision(&self) -> u64 {
        self.state.revision
    }

    /// Returns true once the commit has been published or has failed.
    pub fn is_finished(&self) -> bool {
        self.state.result.lock().is_some()
    }

    /// Blocks until the commit finishes.
    pub fn wait(&self) -> Result<CommitInfo> {
        let mut guard = self.state.result.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return unpack(outcome);
            }
            self.state.cv.wait(&mut guard);
        }
    }

    /// Blocks for at most `timeout`; returns `None` if still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<CommitInfo>> {
        let mut guard = self.state.result.lock();
        if guard.is_none() {
            let _ = self.state.cv.wait_while_for(&mut guard, |r| r.is_none(), timeout);
        }
        guard.as_ref().map(unpack)
    }
}

impl std::fmt::Debug for CommitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitHandle")
            .field("revision", &self.state.revision)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn unpack(outcome: &Outcome) -> Result<CommitInfo> {
    match outcome {
        Ok(info) => Ok(info.clone()),
        Err(err) => Err(DbError::CommitFailed(err.clone())),
    }
}
