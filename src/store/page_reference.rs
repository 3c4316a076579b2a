//! PageReference - A lazily resolved edge of the page trie.
//!
//! A reference is in one of these states:
//!
//! - empty: nothing was ever stored below this slot
//! - persisted: the child has a storage key and an integrity hash, and may
//!   also have its decoded page cached in memory
//! - staged: the child is a page held by a transaction log and receives its
//!   storage key when that log is committed
//!
//! The cached page is memoized on first resolution and never changes
//! afterwards, so a published reference can be shared by any number of
//! readers.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::merkle::Hash;

use super::{Backend, DbError, Page, Result, StorageKey};

/// An edge from a page to one of its children.
#[derive(Clone, Default)]
pub struct PageReference {
    page: OnceLock<Arc<Page>>,
    persisted: Option<(StorageKey, Hash)>,
    staged: bool,
}

impl PageReference {
    /// Creates an empty reference.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a reference to a persisted page that is not loaded yet.
    pub fn persisted(key: StorageKey, hash: Hash) -> Self {
        Self {
            page: OnceLock::new(),
            persisted: Some((key, hash)),
            staged: false,
        }
    }

    /// Creates a reference to a page that was just written.
    pub fn committed(key: StorageKey, hash: Hash, page: Arc<Page>) -> Self {
        Self {
            page: OnceLock::from(page),
            persisted: Some((key, hash)),
            staged: false,
        }
    }

    /// Creates a reference to a page living in a transaction log.
    pub fn staged() -> Self {
        Self {
            page: OnceLock::new(),
            persisted: None,
            staged: true,
        }
    }

    /// Returns true if nothing is stored below this reference.
    pub fn is_empty(&self) -> bool {
        !self.staged && self.persisted.is_none() && self.page.get().is_none()
    }

    #[inline]
    pub fn is_staged(&self) -> bool {
        self.staged
    }

    #[inline]
    pub fn is_persisted(&self) -> bool {
        self.persisted.is_some()
    }

    /// Returns the storage key of the child.
    pub fn key(&self) -> Option<StorageKey> {
        self.persisted.map(|(key, _)| key)
    }

    /// Returns the integrity hash of the child.
    pub fn hash(&self) -> Option<&Hash> {
        self.persisted.as_ref().map(|(_, hash)| hash)
    }

    /// Returns the cached page without touching the backend.
    pub fn cached(&self) -> Option<&Arc<Page>> {
        self.page.get()
    }

    /// Resolves the referenced page.
    ///
    /// Returns `Ok(None)` for an empty reference. A persisted page that is
    /// not cached yet is read from `backend` and memoized. A staged
    /// reference cannot be resolved without the transaction log that holds
    /// its page.
    pub fn resolve(&self, backend: &dyn Backend) -> Result<Option<Arc<Page>>> {
        if let Some(page) = self.page.get() {
            return Ok(Some(page.clone()));
        }
        if let Some((key, _)) = self.persisted {
            let page = Arc::new(backend.read(key)?);
            // A concurrent resolver may have won the race; keep its page.
            let _ = self.page.set(page);
            return Ok(self.page.get().cloned());
        }
        if self.staged {
            return Err(DbError::inconsistent(
                "staged reference resolved outside its transaction log",
            ));
        }
        Ok(None)
    }
}

/// References are compared by identity: key, hash and staging state.
impl PartialEq for PageReference {
    fn eq(&self, other: &Self) -> bool {
        self.persisted == other.persisted && self.staged == other.staged
    }
}

impl Eq for PageReference {}

impl fmt::Debug for PageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.persisted, self.staged) {
            (Some((key, _)), _) => write!(f, "PageReference({})", key),
            (None, true) => write!(f, "PageReference(staged)"),
            (None, false) if self.page.get().is_some() => write!(f, "PageReference(memory)"),
            (None, false) => write!(f, "PageReference(empty)"),
        }
    }
}
