//! WriteTransaction - Copy-on-write builder of the next revision.
//!
//! A write transaction starts from the head snapshot, which is the latest
//! committed revision even if its commit is still being written. It clones
//! the Uber page and the RevisionRoot, then clones pages top-down along the
//! path of every record it touches. Clones are staged in the transaction's
//! [`TransactionLog`]; the parent slot of a staged page is marked staged so
//! the commit knows to link it.
//!
//! ## Page Lookup
//!
//! When a path needs a page that is not in the transaction's own log, the
//! parent slot decides where it comes from:
//!
//! - persisted: read through the reference (lazily, from the backend)
//! - staged: the page belongs to the in-flight commit and is read from its
//!   former log, or from the published revision once that commit finished
//! - empty: a fresh page is synthesized
//!
//! ## Sharing
//!
//! Only pages on a touched path are cloned. Cloning copies the reference
//! array, so every untouched slot keeps pointing at the predecessor's child.

use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::debug;

use crate::commit::{CommitHandle, CommitStrategy, CommitTask};
use crate::data::{Record, TriePath, LEVELS};
use crate::log::{LogKey, LogValue, SealedLog, TransactionLog, TrieSpace};

use super::{
    DbError, Page, PageReference, Result, RevisionMeta, Snapshot, Storage, NAME_SLOT,
    RECORD_ROOT_SLOT, REVISION_ROOT_SLOT,
};

/// Page owning the slot a staged page is linked from.
#[derive(Clone, Copy, Debug)]
enum Holder {
    Uber,
    RevisionRoot,
    Log(LogKey),
}

/// Page counts of a write transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// Pages synthesized because no predecessor existed.
    pub pages_allocated: u64,
    /// Predecessor pages cloned into the log.
    pub pages_cloned: u64,
    /// Pages currently staged.
    pub staged_pages: usize,
    /// Log entries spilled to the overflow store.
    pub spills: u64,
}

/// The single open write transaction of a [`Storage`].
pub struct WriteTransaction<'a> {
    storage: &'a Storage,
    _writer: MutexGuard<'a, ()>,
    log: TransactionLog,
    former: Option<Arc<SealedLog>>,
    revision: u64,
    uber: Page,
    revision_root: Page,
    original_root: Option<Page>,
    pages_allocated: u64,
    pages_cloned: u64,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn begin(
        storage: &'a Storage,
        writer: MutexGuard<'a, ()>,
        head: Option<Arc<Snapshot>>,
        former: Option<Arc<SealedLog>>,
    ) -> Result<Self> {
        let log = TransactionLog::new(storage.config())?;
        let metrics = storage.backend().metrics();

        let (revision, uber, revision_root, original_root) = match &head {
            Some(head) => {
                let revision = head.revision_count()?;
                metrics.inc_cow_operations();
                metrics.inc_cow_operations();
                (
                    revision,
                    head.uber.cow_clone(revision),
                    head.revision_root.cow_clone(revision),
                    Some((*head.revision_root).clone()),
                )
            }
            None => (0, Page::new_uber(0, 1, true), Page::new_revision_root(0), None),
        };

        let mut trx = Self {
            storage,
            _writer: writer,
            log,
            former,
            revision,
            uber,
            revision_root,
            original_root,
            pages_allocated: 0,
            pages_cloned: 0,
        };

        // Route the new RevisionRoot through the revision space.
        let path = trx.prepare_path(TrieSpace::Revision, revision, LEVELS - 1)?;
        trx.stage_slot(
            Holder::Log(LogKey::new(TrieSpace::Revision, (LEVELS - 1) as u8, path.prefix(LEVELS - 1))),
            path.offset(LEVELS - 1),
        )?;

        if head.is_none() {
            trx.bootstrap()?;
        }
        debug!(revision, bootstrap = head.is_none(), "write_trx.begin");
        Ok(trx)
    }

    /// Seeds the first revision with an empty name page and the root record.
    fn bootstrap(&mut self) -> Result<()> {
        self.prepare_name()?;
        self.set_record(0, &[])
    }

    /// Revision this transaction will create.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Metadata of the RevisionRoot being built.
    pub fn revision_meta(&self) -> Result<RevisionMeta> {
        self.revision_root.revision_meta()
    }

    pub fn revision_size(&self) -> Result<u64> {
        Ok(self.revision_meta()?.revision_size)
    }

    pub fn max_record_key(&self) -> Result<u64> {
        Ok(self.revision_meta()?.max_record_key)
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            pages_allocated: self.pages_allocated,
            pages_cloned: self.pages_cloned,
            staged_pages: self.log.len(),
            spills: self.log.spills(),
        }
    }

    /// Reads a record as this transaction currently sees it.
    pub fn get_record(&mut self, key: u64) -> Result<Option<Record>> {
        let (path, slot) = TriePath::for_record(key).ok_or(DbError::OutOfRange(key))?;
        match self.lookup_leaf(&path)? {
            Some(page) => Ok(page.records()?.get(slot).cloned()),
            None => Ok(None),
        }
    }

    /// Stores a record under `key`, replacing any previous content.
    pub fn set_record(&mut self, key: u64, bytes: &[u8]) -> Result<()> {
        let (path, slot) = TriePath::for_record(key).ok_or(DbError::OutOfRange(key))?;
        self.prepare_path(TrieSpace::Record, path.seq(), LEVELS)?;

        let leaf_key = LogKey::data(path.seq());
        let mut value = self.staged(&leaf_key)?;
        let previous = value.modified.records_mut()?.set(slot, Record::new(bytes));
        self.log.put(leaf_key, value)?;

        let meta = self.revision_root.revision_meta_mut()?;
        if previous.is_none() {
            meta.revision_size += 1;
        }
        meta.max_record_key = meta.max_record_key.max(key);
        Ok(())
    }

    /// Stores a record under the next unused key and returns that key.
    pub fn create_record(&mut self, bytes: &[u8]) -> Result<u64> {
        let max = self.max_record_key()?;
        let key = max.checked_add(1).ok_or(DbError::OutOfRange(max))?;
        self.set_record(key, bytes)?;
        Ok(key)
    }

    /// Removes a record, leaving its slot empty. Returns the removed record.
    pub fn remove_record(&mut self, key: u64) -> Result<Option<Record>> {
        if self.get_record(key)?.is_none() {
            return Ok(None);
        }
        let (path, slot) = TriePath::for_record(key).ok_or(DbError::OutOfRange(key))?;
        self.prepare_path(TrieSpace::Record, path.seq(), LEVELS)?;

        let leaf_key = LogKey::data(path.seq());
        let mut value = self.staged(&leaf_key)?;
        let removed = value.modified.records_mut()?.remove(slot);
        self.log.put(leaf_key, value)?;

        if removed.is_some() {
            let meta = self.revision_root.revision_meta_mut()?;
            meta.revision_size = meta.revision_size.saturating_sub(1);
        }
        Ok(removed)
    }

    /// Reads a name from the name page.
    pub fn get_name(&mut self, key: i32) -> Result<Option<String>> {
        let reference = self.holder_reference(Holder::RevisionRoot, NAME_SLOT)?;
        match self.fetch(&LogKey::name(), &reference)? {
            Some(page) => Ok(page.names()?.get(key).map(str::to_string)),
            None => Ok(None),
        }
    }

    /// Stores a name in the name page.
    pub fn set_name(&mut self, key: i32, name: &str) -> Result<()> {
        self.prepare_name()?;
        let mut value = self.staged(&LogKey::name())?;
        value.modified.names_mut()?.insert(key, name);
        self.log.put(LogKey::name(), value)
    }

    /// Removes a name from the name page.
    pub fn remove_name(&mut self, key: i32) -> Result<Option<String>> {
        if self.get_name(key)?.is_none() {
            return Ok(None);
        }
        self.prepare_name()?;
        let mut value = self.staged(&LogKey::name())?;
        let removed = value.modified.names_mut()?.remove(key);
        self.log.put(LogKey::name(), value)?;
        Ok(removed.map(|name| name.to_string()))
    }

    /// Commits using the storage's configured strategy.
    pub fn commit(self) -> Result<CommitHandle> {
        let strategy = self.storage.config().commit_strategy;
        self.commit_with(strategy)
    }

    /// Seals the log and hands it to the commit coordinator.
    ///
    /// With the blocking strategy the revision is published when this
    /// returns. With the non-blocking strategy the returned handle completes
    /// once the background worker has published it; the next write
    /// transaction may begin immediately either way. A store opened with
    /// the blocking strategy has no background worker, so a non-blocking
    /// request on it commits inline and returns a finished handle.
    pub fn commit_with(self, strategy: CommitStrategy) -> Result<CommitHandle> {
        let WriteTransaction {
            storage,
            _writer,
            mut log,
            former,
            revision,
            uber,
            revision_root,
            original_root,
            ..
        } = self;
        drop(former);

        log.put(
            LogKey::revision_root(revision),
            LogValue::new(revision_root.clone(), original_root),
        )?;
        let metrics = storage.backend().metrics();
        metrics.add_log_spills(log.spills());
        let staged = log.len();
        let sealed = Arc::new(log.seal()?);

        let head = Snapshot::new(Arc::new(uber.clone()), Arc::new(revision_root));
        let task = CommitTask {
            revision,
            uber,
            log: sealed,
        };
        debug!(revision, staged, strategy = ?strategy, "write_trx.commit");
        storage.coordinator().submit_with(task, head, strategy)
    }

    /// Discards every staged page.
    pub fn abort(self) -> Result<()> {
        self.storage.backend().metrics().inc_transactions_aborted();
        debug!(revision = self.revision, "write_trx.abort");
        self.log.close()
    }

    /// Clones every page on the path of `seq` in `space` from level 0 down
    /// to `deepest`, skipping pages already staged by this transaction.
    fn prepare_path(&mut self, space: TrieSpace, seq: u64, deepest: usize) -> Result<TriePath> {
        let path = TriePath::for_page(seq).ok_or(DbError::OutOfRange(seq))?;
        for level in 0..=deepest {
            let key = LogKey::new(space, level as u8, path.prefix(level));
            if self.log.contains(&key) {
                continue;
            }
            let (holder, slot) = if level == 0 {
                match space {
                    TrieSpace::Record => (Holder::RevisionRoot, RECORD_ROOT_SLOT),
                    TrieSpace::Revision => (Holder::Uber, REVISION_ROOT_SLOT),
                }
            } else {
                let parent = LogKey::new(space, (level - 1) as u8, path.prefix(level - 1));
                (Holder::Log(parent), path.offset(level - 1))
            };
            self.stage_child(key, holder, slot)?;
        }
        Ok(path)
    }

    fn prepare_name(&mut self) -> Result<()> {
        if !self.log.contains(&LogKey::name()) {
            self.stage_child(LogKey::name(), Holder::RevisionRoot, NAME_SLOT)?;
        }
        Ok(())
    }

    /// Clones (or synthesizes) the page at `key` into the log and marks the
    /// holder's slot as staged.
    fn stage_child(&mut self, key: LogKey, holder: Holder, slot: usize) -> Result<()> {
        let reference = self.holder_reference(holder, slot)?;
        let original = self.fetch(&key, &reference)?;
        let storage = self.storage;
        let metrics = storage.backend().metrics();

        let modified = match &original {
            Some(page) => {
                page.expect_kind(key.kind())?;
                metrics.inc_cow_operations();
                self.pages_cloned += 1;
                page.cow_clone(self.revision)
            }
            None => {
                metrics.inc_pages_allocated();
                self.pages_allocated += 1;
                Page::empty(key.kind(), self.revision)
            }
        };
        let original = original.map(|page| (*page).clone());
        self.log.put(key, LogValue::new(modified, original))?;
        self.stage_slot(holder, slot)
    }

    fn holder_reference(&mut self, holder: Holder, slot: usize) -> Result<PageReference> {
        let reference = match holder {
            Holder::Uber => self.uber.reference(slot).cloned(),
            Holder::RevisionRoot => self.revision_root.reference(slot).cloned(),
            Holder::Log(key) => self.staged(&key)?.modified.reference(slot).cloned(),
        };
        reference.ok_or_else(|| DbError::inconsistent(format!("{:?} has no slot {}", holder, slot)))
    }

    fn stage_slot(&mut self, holder: Holder, slot: usize) -> Result<()> {
        match holder {
            Holder::Uber => self.uber.set_reference(slot, PageReference::staged()),
            Holder::RevisionRoot => self.revision_root.set_reference(slot, PageReference::staged()),
            Holder::Log(key) => {
                let mut value = self.staged(&key)?;
                value.modified.set_reference(slot, PageReference::staged())?;
                self.log.put(key, value)
            }
        }
    }

    /// Returns a page this transaction has staged.
    fn staged(&mut self, key: &LogKey) -> Result<LogValue> {
        self.log
            .get(key)?
            .ok_or_else(|| DbError::inconsistent(format!("{:?} is not staged", key)))
    }

    /// Returns the current page at `key`, reached through `reference`.
    fn fetch(&mut self, key: &LogKey, reference: &PageReference) -> Result<Option<Arc<Page>>> {
        let storage = self.storage;
        let backend = storage.backend().as_ref();
        if !reference.is_staged() {
            return reference.resolve(backend);
        }
        if let Some(value) = self.log.get(key)? {
            return Ok(Some(Arc::new(value.modified)));
        }
        if let Some(former) = &self.former {
            if let Some(value) = former.get(key)? {
                return Ok(Some(Arc::new(value.modified)));
            }
        }
        // The in-flight commit that staged this page has been published.
        let published = storage
            .coordinator()
            .published()
            .ok_or_else(|| DbError::inconsistent(format!("{:?} is staged but nothing is published", key)))?;
        published
            .page_at(backend, key)?
            .map(Some)
            .ok_or_else(|| DbError::inconsistent(format!("staged page {:?} not found", key)))
    }

    /// Walks the record space to the data page of `path` without cloning.
    fn lookup_leaf(&mut self, path: &TriePath) -> Result<Option<Arc<Page>>> {
        let leaf_key = LogKey::data(path.seq());
        if let Some(value) = self.log.get(&leaf_key)? {
            return Ok(Some(Arc::new(value.modified)));
        }

        let mut reference = self.holder_reference(Holder::RevisionRoot, RECORD_ROOT_SLOT)?;
        for level in 0..=LEVELS {
            let key = LogKey::new(TrieSpace::Record, level as u8, path.prefix(level));
            let Some(page) = self.fetch(&key, &reference)? else {
                return Ok(None);
            };
            if level == LEVELS {
                return Ok(Some(page));
            }
            reference = page.reference(path.offset(level)).cloned().unwrap_or_default();
        }
        Ok(None)
    }
}
