//! Backend - Physical page storage behind the trie.
//!
//! The engine needs very little from a backend: append a page and get a key
//! back, read a page by key, and durably designate one page as the root.
//! Pages are handed over as encoded bytes; the provided methods on
//! [`Backend`] take care of the page codec.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;

use super::{page_codec, DbError, DbMetrics, FastHashMap, Page, PageKind, Result, StorageKey};

/// Byte-level page store.
///
/// Writes are issued by one committer at a time; reads may come from any
/// number of threads.
pub trait Backend: Send + Sync {
    /// Stores one encoded page and returns its key.
    fn write_bytes(&self, bytes: &[u8]) -> Result<StorageKey>;

    /// Stores an encoded root page and makes it the page returned by
    /// [`Backend::read_root`]. Once this returns, the root is durable.
    fn write_root_bytes(&self, bytes: &[u8]) -> Result<StorageKey>;

    /// Returns the encoded page stored under `key`.
    fn read_bytes(&self, key: StorageKey) -> Result<Vec<u8>>;

    /// Returns the key of the most recently published root.
    fn root_key(&self) -> Result<Option<StorageKey>>;

    /// Flushes and releases the backend.
    fn close(&self) -> Result<()>;

    /// Page traffic counters.
    fn metrics(&self) -> &DbMetrics;

    /// Serializes and stores a page.
    fn write(&self, page: &Page) -> Result<StorageKey> {
        if page.has_staged_references() {
            return Err(DbError::inconsistent(format!(
                "{:?} page of revision {} still references staged children",
                page.kind(),
                page.revision()
            )));
        }
        self.write_bytes(&page_codec::encode(page)?)
    }

    /// Serializes and stores the root page.
    fn write_root(&self, page: &Page) -> Result<StorageKey> {
        page.expect_kind(PageKind::Uber)?;
        if page.has_staged_references() {
            return Err(DbError::inconsistent("root page references staged children"));
        }
        self.write_root_bytes(&page_codec::encode(page)?)
    }

    /// Reads and deserializes a page.
    fn read(&self, key: StorageKey) -> Result<Page> {
        page_codec::decode(&self.read_bytes(key)?)
    }

    /// Reads the most recently published root page.
    fn read_root(&self) -> Result<Option<Page>> {
        match self.root_key()? {
            Some(key) => {
                let page = self.read(key)?;
                page.expect_kind(PageKind::Uber)?;
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }
}

/// Heap-backed page store.
///
/// Keys are handed out sequentially starting at 1.
pub struct MemoryBackend {
    pages: RwLock<FastHashMap<StorageKey, Arc<[u8]>>>,
    next_key: AtomicU64,
    root: AtomicU64,
    metrics: DbMetrics,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            pages: RwLock::new(FastHashMap::with_hasher(FxBuildHasher)),
            next_key: AtomicU64::new(1),
            root: AtomicU64::new(0),
            metrics: DbMetrics::new(),
        }
    }

    /// Number of stored pages.
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }

    /// Returns true if a page is stored under `key`.
    pub fn contains(&self, key: StorageKey) -> bool {
        self.pages.read().contains_key(&key)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn write_bytes(&self, bytes: &[u8]) -> Result<StorageKey> {
        let key = StorageKey::new(self.next_key.fetch_add(1, Ordering::Relaxed));
        self.pages.write().insert(key, Arc::from(bytes));
        self.metrics.record_write(bytes.len());
        Ok(key)
    }

    fn write_root_bytes(&self, bytes: &[u8]) -> Result<StorageKey> {
        let key = self.write_bytes(bytes)?;
        self.root.store(key.raw(), Ordering::Release);
        Ok(key)
    }

    fn read_bytes(&self, key: StorageKey) -> Result<Vec<u8>> {
        let pages = self.pages.read();
        let bytes = pages.get(&key).ok_or(DbError::PageNotFound(key))?;
        self.metrics.record_read(bytes.len());
        Ok(bytes.to_vec())
    }

    fn root_key(&self) -> Result<Option<StorageKey>> {
        let raw = self.root.load(Ordering::Acquire);
        Ok((raw != 0).then_some(StorageKey::new(raw)))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn metrics(&self) -> &DbMetrics {
        &self.metrics
    }
}
