//! Trie walks and revision snapshots.
//!
//! Both trie spaces share one addressing law (see [`TriePath`]): the page at
//! level `l` with prefix `p` is reached from the space root by following, at
//! each level `i < l`, slot `(p >> (7 * (l - 1 - i))) & 127`.

use std::sync::Arc;

use crate::data::{FANOUT_BITS, LEVELS};
use crate::log::{LogKey, TrieSpace};

use super::{
    Backend, DbError, Page, PageKind, PageReference, Result, NAME_SLOT, RECORD_ROOT_SLOT,
    REVISION_ROOT_SLOT,
};

const SLOT_MASK: u64 = (1 << FANOUT_BITS) - 1;

/// Resolves the leaf page for sequence number `seq` below `root`.
///
/// Walks `LEVELS` indirect pages. Returns `Ok(None)` if any edge on the way
/// is empty. Never mutates; persisted pages that are not in memory yet are
/// read from `backend` and memoized on their reference.
pub fn resolve(backend: &dyn Backend, root: &PageReference, seq: u64) -> Result<Option<Arc<Page>>> {
    resolve_at(backend, root, LEVELS, seq)
}

/// Resolves the page at `level` whose prefix is `prefix`.
pub fn resolve_at(
    backend: &dyn Backend,
    root: &PageReference,
    level: usize,
    prefix: u64,
) -> Result<Option<Arc<Page>>> {
    if level > LEVELS {
        return Err(DbError::inconsistent(format!("trie level {} out of bounds", level)));
    }
    if prefix >> (FANOUT_BITS * level as u32) != 0 {
        return Err(DbError::OutOfRange(prefix));
    }

    let Some(mut current) = root.resolve(backend)? else {
        return Ok(None);
    };
    for i in 0..level {
        current.expect_kind(PageKind::Indirect)?;
        let shift = FANOUT_BITS * (level - 1 - i) as u32;
        let slot = ((prefix >> shift) & SLOT_MASK) as usize;
        let next = match current.reference(slot) {
            Some(reference) => reference.resolve(backend)?,
            None => None,
        };
        match next {
            Some(page) => current = page,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Root pages of one revision.
///
/// A published snapshot only holds persisted pages. The head snapshot of an
/// in-flight commit holds the not yet written Uber and RevisionRoot pages,
/// whose staged slots live in that commit's log.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub uber: Arc<Page>,
    pub revision_root: Arc<Page>,
}

impl Snapshot {
    pub fn new(uber: Arc<Page>, revision_root: Arc<Page>) -> Self {
        Self { uber, revision_root }
    }

    /// Builds the snapshot of the latest revision below a persisted Uber page.
    pub fn load(backend: &dyn Backend, uber: Page) -> Result<Self> {
        let meta = uber.uber_meta()?;
        let latest = meta
            .revision_count
            .checked_sub(1)
            .ok_or_else(|| DbError::inconsistent("root page without any revision"))?;
        let uber = Arc::new(uber);
        let revision_root = Self::revision_root_of(backend, &uber, latest)?;
        Ok(Self { uber, revision_root })
    }

    /// Resolves the RevisionRoot of `revision` through the revision space.
    pub fn revision_root_of(backend: &dyn Backend, uber: &Page, revision: u64) -> Result<Arc<Page>> {
        let root = uber
            .reference(REVISION_ROOT_SLOT)
            .ok_or_else(|| DbError::inconsistent("uber page without revision slot"))?;
        let page = resolve(backend, root, revision)?.ok_or(DbError::RevisionNotFound(revision))?;
        page.expect_kind(PageKind::RevisionRoot)?;
        if page.revision() != revision {
            return Err(DbError::inconsistent(format!(
                "revision slot {} holds revision {}",
                revision,
                page.revision()
            )));
        }
        Ok(page)
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision_root.revision()
    }

    pub fn revision_count(&self) -> Result<u64> {
        Ok(self.uber.uber_meta()?.revision_count)
    }

    /// Resolves the page occupying `key`'s position in this revision.
    ///
    /// The RevisionRoot position is taken from the snapshot itself when it
    /// names this revision, and looked up in the revision space otherwise.
    pub fn page_at(&self, backend: &dyn Backend, key: &LogKey) -> Result<Option<Arc<Page>>> {
        if key.is_name() {
            return match self.revision_root.reference(NAME_SLOT) {
                Some(reference) => reference.resolve(backend),
                None => Ok(None),
            };
        }
        if key.is_revision_root() && key.seq == self.revision() {
            return Ok(Some(self.revision_root.clone()));
        }
        let (root, slot_owner) = match key.space {
            TrieSpace::Record => (self.revision_root.reference(RECORD_ROOT_SLOT), PageKind::RevisionRoot),
            TrieSpace::Revision => (self.uber.reference(REVISION_ROOT_SLOT), PageKind::Uber),
        };
        let root = root.ok_or_else(|| {
            DbError::inconsistent(format!("{:?} page without a space root slot", slot_owner))
        })?;
        resolve_at(backend, root, key.level as usize, key.seq)
    }
}
