//! Storage - Entry point tying a backend, its commit coordinator and the
//! single-writer lock together.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::commit::{CommitCoordinator, CommitInfo, CommitStrategy, StorageConfig};
use crate::log::{LogKey, LogValue};
use crate::merkle::{page_hash, verify_page_tree, Hash, VerifyReport};

use super::{
    Backend, DbError, DbMetrics, FileBackend, MemoryBackend, ReadTransaction, Result, Snapshot,
    WriteTransaction,
};

/// A revisioned page store.
///
/// Readers open [`ReadTransaction`]s on published revisions at any time. A
/// single [`WriteTransaction`] at a time builds the next revision; its commit
/// is written by the [`CommitCoordinator`] according to the configured
/// [`CommitStrategy`].
pub struct Storage {
    backend: Arc<dyn Backend>,
    coordinator: CommitCoordinator,
    writer: Mutex<()>,
    config: StorageConfig,
}

impl Storage {
    /// Opens a store on `backend`, bootstrapping revision 0 if the backend
    /// holds no root yet.
    pub fn open(backend: Arc<dyn Backend>, config: StorageConfig) -> Result<Self> {
        let coordinator = CommitCoordinator::new(backend.clone(), &config)?;
        let storage = Self {
            backend,
            coordinator,
            writer: Mutex::new(()),
            config,
        };

        match storage.backend.read_root()? {
            Some(uber) => {
                let snapshot = Snapshot::load(storage.backend.as_ref(), uber)?;
                info!(
                    revision = snapshot.revision(),
                    revisions = snapshot.revision_count()?,
                    "storage.open"
                );
                storage.coordinator.install(snapshot);
            }
            None => {
                debug!("storage.bootstrap");
                let trx = storage.begin_write()?;
                trx.commit_with(CommitStrategy::Blocking)?.wait()?;
                info!("storage.bootstrapped");
            }
        }
        Ok(storage)
    }

    /// Opens a store held entirely in memory.
    pub fn in_memory(config: StorageConfig) -> Result<Self> {
        Self::open(Arc::new(MemoryBackend::new()), config)
    }

    /// Opens (or creates) a store backed by the page file at `path`.
    pub fn open_file<P: AsRef<Path>>(path: P, config: StorageConfig) -> Result<Self> {
        Self::open(Arc::new(FileBackend::open(path)?), config)
    }

    /// Begins a reader on the latest published revision.
    pub fn begin_read(&self) -> Result<ReadTransaction> {
        let snapshot = self.published()?;
        Ok(ReadTransaction::new(self.backend.clone(), &snapshot))
    }

    /// Begins a reader on a historical revision.
    pub fn begin_read_at(&self, revision: u64) -> Result<ReadTransaction> {
        let published = self.published()?;
        if revision >= published.revision_count()? {
            return Err(DbError::RevisionNotFound(revision));
        }
        let revision_root = if revision == published.revision() {
            published.revision_root.clone()
        } else {
            Snapshot::revision_root_of(self.backend.as_ref(), &published.uber, revision)?
        };
        let snapshot = Snapshot::new(published.uber.clone(), revision_root);
        Ok(ReadTransaction::new(self.backend.clone(), &snapshot))
    }

    /// Begins the write transaction for the next revision.
    ///
    /// Fails with [`DbError::WriterActive`] while another one is open.
    pub fn begin_write(&self) -> Result<WriteTransaction<'_>> {
        let guard = self.writer.try_lock().ok_or(DbError::WriterActive)?;
        // Former before head: a commit finishing in between leaves a stale
        // but still readable former log.
        let former = self.coordinator.former();
        let head = self.coordinator.head();
        WriteTransaction::begin(self, guard, head, former)
    }

    /// Latest published revision.
    pub fn latest_revision(&self) -> Result<u64> {
        Ok(self.published()?.revision())
    }

    /// Number of published revisions.
    pub fn revision_count(&self) -> Result<u64> {
        self.published()?.revision_count()
    }

    /// Integrity hash of the published Uber page.
    pub fn root_hash(&self) -> Result<Hash> {
        page_hash(&self.published()?.uber)
    }

    /// Reads a page of the commit currently being written in the background.
    pub fn get_former(&self, key: &LogKey) -> Result<Option<LogValue>> {
        self.coordinator.get_former(key)
    }

    /// Waits for the in-flight commit, if any.
    pub fn sync(&self) -> Result<Option<CommitInfo>> {
        self.coordinator.sync()
    }

    /// Re-reads every page reachable from the published Uber page and checks
    /// it against the hash stored in its parent.
    pub fn verify_integrity(&self) -> Result<VerifyReport> {
        let published = self.published()?;
        verify_page_tree(self.backend.as_ref(), &published.uber)
    }

    pub fn metrics(&self) -> &DbMetrics {
        self.backend.metrics()
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub(crate) fn coordinator(&self) -> &CommitCoordinator {
        &self.coordinator
    }

    /// Waits for the background commit within the close timeout, then
    /// closes the backend.
    pub fn close(&self) -> Result<()> {
        self.coordinator.close()?;
        self.backend.close()?;
        info!("storage.closed");
        Ok(())
    }

    fn published(&self) -> Result<Arc<Snapshot>> {
        self.coordinator
            .published()
            .ok_or_else(|| DbError::inconsistent("no published revision"))
    }
}
