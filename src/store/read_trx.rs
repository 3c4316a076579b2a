//! ReadTransaction - Snapshot reader of one published revision.

use std::sync::Arc;

use crate::data::{Record, TriePath};

use super::{resolve, Backend, DbError, Page, Result, RevisionMeta, Snapshot, NAME_SLOT, RECORD_ROOT_SLOT};

/// Read-only view of a published revision.
///
/// A reader pins the Uber page and RevisionRoot it was opened on. Pages it
/// resolves are immutable, so commits published afterwards are never
/// observed. Any number of readers may run alongside the writer.
pub struct ReadTransaction {
    backend: Arc<dyn Backend>,
    uber: Arc<Page>,
    revision_root: Arc<Page>,
}

impl ReadTransaction {
    pub(crate) fn new(backend: Arc<dyn Backend>, snapshot: &Snapshot) -> Self {
        backend.metrics().inc_read_transactions();
        Self {
            backend,
            uber: snapshot.uber.clone(),
            revision_root: snapshot.revision_root.clone(),
        }
    }

    /// Revision this reader observes.
    pub fn revision(&self) -> u64 {
        self.revision_root.revision()
    }

    /// Number of revisions published when the pinned Uber page was written.
    pub fn revision_count(&self) -> Result<u64> {
        Ok(self.uber.uber_meta()?.revision_count)
    }

    pub fn revision_meta(&self) -> Result<RevisionMeta> {
        self.revision_root.revision_meta()
    }

    /// Number of records live in this revision.
    pub fn revision_size(&self) -> Result<u64> {
        Ok(self.revision_meta()?.revision_size)
    }

    /// Highest record key ever assigned up to this revision.
    pub fn max_record_key(&self) -> Result<u64> {
        Ok(self.revision_meta()?.max_record_key)
    }

    /// Commit time of this revision, in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> Result<u64> {
        Ok(self.revision_meta()?.timestamp)
    }

    /// Reads a record.
    pub fn get_record(&self, key: u64) -> Result<Option<Record>> {
        let (path, slot) = TriePath::for_record(key).ok_or(DbError::OutOfRange(key))?;
        match self.resolve_page(path.seq())? {
            Some(page) => Ok(page.records()?.get(slot).cloned()),
            None => Ok(None),
        }
    }

    /// Reads a name.
    pub fn get_name(&self, key: i32) -> Result<Option<String>> {
        let Some(reference) = self.revision_root.reference(NAME_SLOT) else {
            return Ok(None);
        };
        match reference.resolve(self.backend.as_ref())? {
            Some(page) => Ok(page.names()?.get(key).map(str::to_string)),
            None => Ok(None),
        }
    }

    /// Resolves the data page `page_seq` of this revision.
    pub fn resolve_page(&self, page_seq: u64) -> Result<Option<Arc<Page>>> {
        if TriePath::for_page(page_seq).is_none() {
            return Err(DbError::OutOfRange(page_seq));
        }
        match self.revision_root.reference(RECORD_ROOT_SLOT) {
            Some(root) => resolve(self.backend.as_ref(), root, page_seq),
            None => Ok(None),
        }
    }

    pub fn uber_page(&self) -> &Arc<Page> {
        &self.uber
    }

    pub fn revision_root(&self) -> &Arc<Page> {
        &self.revision_root
    }
}
