//! CommitCoordinator - Turns sealed transaction logs into published revisions.
//!
//! ## Algorithm
//!
//! The sealed log is walked in [`LogKey`] order, which writes every child
//! before its parent. For each page:
//!
//! 1. the storage keys and hashes of its already written children are
//!    placed into their slots
//! 2. slots still marked staged were inherited from an earlier in-flight
//!    commit and are copied from the same position of the published revision
//! 3. the page is encoded, hashed with Keccak-256 and written
//! 4. the resulting reference is queued for the page's parent
//!
//! The Uber page is written last through `write_root`, and only then is the
//! new snapshot published. A failure anywhere before that leaves the
//! published snapshot untouched.
//!
//! ## Strategies
//!
//! With [`CommitStrategy::Blocking`] the committing thread runs the
//! algorithm itself. With [`CommitStrategy::NonBlocking`] the sealed log is
//! handed to a single worker thread; while it runs, the log stays reachable
//! as the former log so reads of not yet written pages can be served from it.
//! A new commit waits for the previous one before it is queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxBuildHasher;
use tracing::{debug, info, warn};

use super::{CommitHandle, CommitInfo, CommitStrategy, StorageConfig};
use crate::log::{LogKey, LogValue, Parent, SealedLog};
use crate::merkle::keccak256;
use crate::store::{
    page_codec, Backend, DbError, FastHashMap, Page, PageReference, Result, Snapshot,
};

/// A sealed transaction ready to be written.
pub struct CommitTask {
    /// Revision being committed.
    pub revision: u64,
    /// The not yet written Uber page of the new revision.
    pub uber: Page,
    /// Every other page of the new revision that differs from its predecessor.
    pub log: Arc<SealedLog>,
}

type Job = (CommitTask, CommitHandle);

struct Worker {
    sender: Sender<Job>,
    exited: Receiver<()>,
    thread: JoinHandle<()>,
}

/// State shared between the coordinator and its worker.
struct Shared {
    backend: Arc<dyn Backend>,
    /// Latest durable revision; the single visibility point for readers.
    published: RwLock<Option<Arc<Snapshot>>>,
    /// Latest committed revision, possibly still being written.
    head: RwLock<Option<Arc<Snapshot>>>,
    /// Log of the commit currently being written in the background.
    former: RwLock<Option<Arc<SealedLog>>>,
}

/// Writes committed transactions and publishes their roots.
pub struct CommitCoordinator {
    shared: Arc<Shared>,
    strategy: CommitStrategy,
    close_timeout: Duration,
    worker: Mutex<Option<Worker>>,
    in_flight: Mutex<Option<CommitHandle>>,
    closed: AtomicBool,
}

impl CommitCoordinator {
    /// Creates a coordinator, starting the background worker if the
    /// configured strategy needs one.
    pub fn new(backend: Arc<dyn Backend>, config: &StorageConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            backend,
            published: RwLock::new(None),
            head: RwLock::new(None),
            former: RwLock::new(None),
        });

        let worker = match config.commit_strategy {
            CommitStrategy::Blocking => None,
            CommitStrategy::NonBlocking => Some(Self::spawn_worker(shared.clone())?),
        };

        Ok(Self {
            shared,
            strategy: config.commit_strategy,
            close_timeout: config.close_timeout,
            worker: Mutex::new(worker),
            in_flight: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn spawn_worker(shared: Arc<Shared>) -> Result<Worker> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let (exit_tx, exited) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("revtrie-commit".to_string())
            .spawn(move || {
                debug!("commit.worker.start");
                while let Ok((task, handle)) = receiver.recv() {
                    let outcome = shared.commit(task);
                    handle.finish(outcome);
                }
                debug!("commit.worker.exit");
                let _ = exit_tx.send(());
            })?;
        Ok(Worker {
            sender,
            exited,
            thread,
        })
    }

    /// Installs an already durable snapshot, used when reopening a store.
    pub fn install(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        *self.shared.published.write() = Some(snapshot.clone());
        *self.shared.head.write() = Some(snapshot);
    }

    /// Latest durable snapshot.
    pub fn published(&self) -> Option<Arc<Snapshot>> {
        self.shared.published.read().clone()
    }

    /// Latest committed snapshot, possibly still being written.
    pub fn head(&self) -> Option<Arc<Snapshot>> {
        self.shared.head.read().clone()
    }

    /// Log of the background commit in flight, if any.
    pub fn former(&self) -> Option<Arc<SealedLog>> {
        self.shared.former.read().clone()
    }

    /// Reads a page of the in-flight commit.
    pub fn get_former(&self, key: &LogKey) -> Result<Option<LogValue>> {
        match self.former() {
            Some(log) => log.get(key),
            None => Ok(None),
        }
    }

    pub fn strategy(&self) -> CommitStrategy {
        self.strategy
    }

    /// Submits a sealed transaction using the configured strategy.
    pub fn submit(&self, task: CommitTask, head: Snapshot) -> Result<CommitHandle> {
        self.submit_with(task, head, self.strategy)
    }

    /// Submits a sealed transaction.
    ///
    /// `head` becomes the base of the next write transaction right away. In
    /// blocking mode the returned handle is already finished; a failure is
    /// returned directly. A non-blocking request on a store started without
    /// a background worker commits inline the same way.
    pub fn submit_with(
        &self,
        task: CommitTask,
        head: Snapshot,
        strategy: CommitStrategy,
    ) -> Result<CommitHandle> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }

        // At most one commit in flight. Its failure surfaces below through
        // the predecessor check.
        let previous = self.in_flight.lock().take();
        if let Some(previous) = previous {
            if let Err(err) = previous.wait() {
                debug!(revision = previous.revision(), error = %err, "commit.previous_failed");
            }
        }

        let revision = task.revision;
        *self.shared.head.write() = Some(Arc::new(head));

        let sender = match strategy {
            CommitStrategy::NonBlocking => {
                let sender = self.worker.lock().as_ref().map(|w| w.sender.clone());
                if sender.is_none() {
                    warn!(revision, "commit.non_blocking_without_worker");
                }
                sender
            }
            CommitStrategy::Blocking => None,
        };
        match sender {
            Some(sender) => {
                let handle = CommitHandle::pending(revision);
                *self.shared.former.write() = Some(task.log.clone());
                debug!(revision, pages = task.log.len(), "commit.enqueue");
                if sender.send((task, handle.clone())).is_err() {
                    self.shared.rollback_head();
                    *self.shared.former.write() = None;
                    return Err(DbError::Closed);
                }
                *self.in_flight.lock() = Some(handle.clone());
                Ok(handle)
            }
            None => {
                let info = self.shared.commit(task)?;
                Ok(CommitHandle::completed(info))
            }
        }
    }

    /// Waits for the in-flight commit, if any, and returns its outcome.
    pub fn sync(&self) -> Result<Option<CommitInfo>> {
        let handle = self.in_flight.lock().clone();
        match handle {
            Some(handle) => handle.wait().map(Some),
            None => Ok(None),
        }
    }

    /// Stops accepting commits and waits up to the close timeout for the
    /// background worker to drain.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let worker = self.worker.lock().take();
        let Some(Worker {
            sender,
            exited,
            thread,
        }) = worker
        else {
            return Ok(());
        };

        drop(sender);
        match exited.recv_timeout(self.close_timeout) {
            Ok(()) => thread
                .join()
                .map_err(|_| DbError::inconsistent("commit worker panicked")),
            Err(RecvTimeoutError::Disconnected) => {
                Err(DbError::inconsistent("commit worker exited abnormally"))
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.close_timeout, "commit.close.timeout");
                Err(DbError::timed_out(
                    "background commit did not finish within the close timeout",
                ))
            }
        }
    }
}

impl Drop for CommitCoordinator {
    fn drop(&mut self) {
        // Disconnecting the queue lets the worker finish its last job and exit.
        drop(self.worker.get_mut().take());
    }
}

impl Shared {
    fn commit(&self, task: CommitTask) -> Result<CommitInfo> {
        let revision = task.revision;
        let log = task.log.clone();
        let metrics = self.backend.metrics();
        debug!(revision, pages = log.len(), "commit.start");

        match self.write_revision(task) {
            Ok((snapshot, info)) => {
                let snapshot = Arc::new(snapshot);
                *self.published.write() = Some(snapshot.clone());
                {
                    let mut head = self.head.write();
                    if head.as_ref().map_or(true, |h| h.revision() <= revision) {
                        *head = Some(snapshot);
                    }
                }
                self.clear_former(&log);
                metrics.inc_commits_completed();
                info!(
                    revision,
                    pages = info.pages_written,
                    bytes = info.bytes_written,
                    root = %info.root_key,
                    "commit.published"
                );
                if let Ok(log) = Arc::try_unwrap(log) {
                    if let Err(err) = log.close() {
                        warn!(revision, error = %err, "commit.log_cleanup_failed");
                    }
                }
                Ok(info)
            }
            Err(err) => {
                self.rollback_head();
                self.clear_former(&log);
                metrics.inc_commits_failed();
                warn!(revision, error = %err, "commit.failed");
                Err(err)
            }
        }
    }

    fn write_revision(&self, task: CommitTask) -> Result<(Snapshot, CommitInfo)> {
        let CommitTask {
            revision,
            mut uber,
            log,
        } = task;

        let published = self.published.read().clone();
        let expected = match &published {
            Some(snapshot) => snapshot.revision_count()?,
            None => 0,
        };
        if revision != expected {
            return Err(DbError::inconsistent(format!(
                "revision {} does not follow the published revision count {}",
                revision, expected
            )));
        }

        let mut pending: FastHashMap<LogKey, Vec<(usize, PageReference)>> =
            FastHashMap::with_hasher(FxBuildHasher);
        let mut revision_root = None;
        let mut pages_written = 0usize;
        let mut bytes_written = 0u64;

        for entry in log.iter() {
            let (key, value) = entry?;
            let mut page = value.modified;
            page.expect_kind(key.kind())?;

            for (slot, reference) in pending.remove(&key).unwrap_or_default() {
                page.set_reference(slot, reference)?;
            }
            self.inherit_staged(published.as_deref(), &key, &mut page)?;

            let bytes = page_codec::encode(&page)?;
            let hash = keccak256(&bytes);
            let storage_key = self.backend.write_bytes(&bytes)?;
            pages_written += 1;
            bytes_written += bytes.len() as u64;

            let page = Arc::new(page);
            if key == LogKey::revision_root(revision) {
                revision_root = Some(page.clone());
            }
            let reference = PageReference::committed(storage_key, hash, page);
            match key.parent(revision) {
                Parent::Uber(slot) => uber.set_reference(slot, reference)?,
                Parent::Log(parent, slot) => pending.entry(parent).or_default().push((slot, reference)),
            }
        }

        if let Some(orphan) = pending.keys().next() {
            return Err(DbError::inconsistent(format!(
                "staged children of {:?} have no staged parent",
                orphan
            )));
        }
        let revision_root = revision_root.ok_or_else(|| {
            DbError::inconsistent(format!("commit of revision {} has no revision root", revision))
        })?;

        for slot in 0..uber.references().len() {
            if uber.references()[slot].is_staged() {
                let inherited = published
                    .as_ref()
                    .and_then(|s| s.uber.reference(slot))
                    .filter(|r| r.is_persisted())
                    .cloned()
                    .ok_or_else(|| DbError::inconsistent("uber slot left staged"))?;
                uber.set_reference(slot, inherited)?;
            }
        }
        {
            let meta = uber.uber_meta_mut()?;
            meta.bootstrap = false;
            if meta.revision_count != revision + 1 {
                return Err(DbError::inconsistent(format!(
                    "uber page of revision {} counts {} revisions",
                    revision, meta.revision_count
                )));
            }
        }

        let bytes = page_codec::encode(&uber)?;
        let root_hash = keccak256(&bytes);
        let root_key = self.backend.write_root_bytes(&bytes)?;
        pages_written += 1;
        bytes_written += bytes.len() as u64;

        let info = CommitInfo {
            revision,
            pages_written,
            bytes_written,
            root_key,
            root_hash,
        };
        Ok((Snapshot::new(Arc::new(uber), revision_root), info))
    }

    /// Replaces staged slots that no page of this log claimed with the
    /// reference at the same position of the published revision.
    fn inherit_staged(&self, published: Option<&Snapshot>, key: &LogKey, page: &mut Page) -> Result<()> {
        if !page.has_staged_references() {
            return Ok(());
        }
        let snapshot = published.ok_or_else(|| {
            DbError::inconsistent(format!("{:?} inherits staged slots without a published revision", key))
        })?;
        let source = if key.is_revision_root() {
            Some(snapshot.revision_root.clone())
        } else {
            snapshot.page_at(self.backend.as_ref(), key)?
        };
        let source = source.ok_or_else(|| {
            DbError::inconsistent(format!("{:?} has no published counterpart", key))
        })?;

        for slot in 0..page.references().len() {
            if page.references()[slot].is_staged() {
                let inherited = source
                    .reference(slot)
                    .filter(|r| r.is_persisted())
                    .cloned()
                    .ok_or_else(|| {
                        DbError::inconsistent(format!("{:?} slot {} is not published", key, slot))
                    })?;
                page.set_reference(slot, inherited)?;
            }
        }
        Ok(())
    }

    fn rollback_head(&self) {
        let published = self.published.read().clone();
        *self.head.write() = published;
    }

    fn clear_former(&self, log: &Arc<SealedLog>) {
        let mut former = self.former.write();
        if former.as_ref().is_some_and(|f| Arc::ptr_eq(f, log)) {
            *former = None;
        }
    }
}
