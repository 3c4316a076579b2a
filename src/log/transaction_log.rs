//! TransactionLog - Bounded-memory staging area of one write transaction.
//!
//! Pages touched by a transaction are kept in an LRU cache keyed by
//! [`LogKey`]. When the cache is full, inserting a new key evicts the least
//! recently used entry into the [`OverflowStore`] instead of dropping it, so
//! a transaction may touch more pages than fit in memory. Reads consult the
//! cache first and fall back to the overflow store; they never insert.

use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use tracing::trace;

use super::{LogKey, LogValue, OverflowIter, OverflowStore, SealedLog};
use crate::commit::StorageConfig;
use crate::store::Result;

/// Write-ahead staging log for one transaction.
pub struct TransactionLog {
    cache: LruCache<LogKey, LogValue>,
    overflow: OverflowStore,
    spills: u64,
}

impl TransactionLog {
    /// Creates a log sized and placed according to `config`.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::with_capacity(config.log_cache_capacity, &config.log_dir())
    }

    /// Creates a log holding at most `capacity` entries in memory.
    pub fn with_capacity(capacity: usize, dir: &Path) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            cache: LruCache::new(capacity),
            overflow: OverflowStore::create(dir)?,
            spills: 0,
        })
    }

    /// Inserts or replaces an entry.
    ///
    /// May spill the least recently used entry to the overflow store.
    pub fn put(&mut self, key: LogKey, value: LogValue) -> Result<()> {
        if let Some((evicted_key, evicted)) = self.cache.push(key, value) {
            if evicted_key != key {
                trace!(key = ?evicted_key, "log.spill");
                self.overflow.put(evicted_key, &evicted)?;
                self.spills += 1;
            }
        }
        Ok(())
    }

    /// Returns the buffered entry for `key`.
    pub fn get(&mut self, key: &LogKey) -> Result<Option<LogValue>> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value.clone()));
        }
        self.overflow.get(key)
    }

    pub fn contains(&self, key: &LogKey) -> bool {
        self.cache.contains(key) || self.overflow.contains(key)
    }

    /// Number of distinct keys in the log.
    pub fn len(&self) -> usize {
        let cache_only = self
            .cache
            .iter()
            .filter(|(key, _)| !self.overflow.contains(key))
            .count();
        self.overflow.len() + cache_only
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty() && self.overflow.is_empty()
    }

    /// Number of entries currently held in memory.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Number of evictions spilled so far.
    pub fn spills(&self) -> u64 {
        self.spills
    }

    /// Writes every cache-resident entry to the overflow store.
    pub fn flush(&mut self) -> Result<()> {
        for (key, value) in self.cache.iter() {
            self.overflow.put(*key, value)?;
        }
        Ok(())
    }

    /// Iterates over all entries in commit order.
    ///
    /// Cache-resident entries are flushed first so the iteration reads one
    /// consistent source.
    pub fn iter(&mut self) -> Result<OverflowIter<'_>> {
        self.flush()?;
        Ok(self.overflow.iter())
    }

    /// Flushes and freezes the log for commit.
    pub fn seal(mut self) -> Result<SealedLog> {
        self.flush()?;
        self.overflow.seal()
    }

    /// Discards the log and deletes its overflow store.
    pub fn close(self) -> Result<()> {
        self.overflow.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use crate::store::Page;

    fn value(seq: u64, tag: &[u8]) -> LogValue {
        let mut page = Page::new_data(seq);
        page.records_mut().unwrap().set(1, Record::new(tag));
        LogValue::new(page, None)
    }

    #[test]
    fn test_get_without_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TransactionLog::with_capacity(4, dir.path()).unwrap();

        log.put(LogKey::data(1), value(1, b"a")).unwrap();
        assert_eq!(log.get(&LogKey::data(1)).unwrap(), Some(value(1, b"a")));
        assert!(log.get(&LogKey::data(2)).unwrap().is_none());
        assert_eq!(log.spills(), 0);
    }

    #[test]
    fn test_eviction_spills_instead_of_dropping() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TransactionLog::with_capacity(2, dir.path()).unwrap();

        for seq in 0..10 {
            log.put(LogKey::data(seq), value(seq, &[seq as u8])).unwrap();
        }
        assert_eq!(log.cached_len(), 2);
        assert_eq!(log.spills(), 8);
        assert_eq!(log.len(), 10);

        for seq in 0..10 {
            assert_eq!(log.get(&LogKey::data(seq)).unwrap(), Some(value(seq, &[seq as u8])));
        }
    }

    #[test]
    fn test_reads_do_not_evict() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TransactionLog::with_capacity(1, dir.path()).unwrap();
        log.put(LogKey::data(0), value(0, b"x")).unwrap();
        log.put(LogKey::data(1), value(1, b"y")).unwrap();
        let spills = log.spills();

        for _ in 0..5 {
            log.get(&LogKey::data(0)).unwrap();
            log.get(&LogKey::data(1)).unwrap();
        }
        assert_eq!(log.spills(), spills);
    }

    #[test]
    fn test_replacement_is_not_a_spill() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TransactionLog::with_capacity(1, dir.path()).unwrap();
        log.put(LogKey::data(0), value(0, b"v1")).unwrap();
        log.put(LogKey::data(0), value(0, b"v2")).unwrap();
        assert_eq!(log.spills(), 0);
        assert_eq!(log.get(&LogKey::data(0)).unwrap(), Some(value(0, b"v2")));
    }

    #[test]
    fn test_newer_cache_value_shadows_spilled_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TransactionLog::with_capacity(1, dir.path()).unwrap();
        log.put(LogKey::data(0), value(0, b"old")).unwrap();
        log.put(LogKey::data(1), value(1, b"evicts 0")).unwrap();
        log.put(LogKey::data(0), value(0, b"new")).unwrap();

        assert_eq!(log.get(&LogKey::data(0)).unwrap(), Some(value(0, b"new")));
        let entries: Vec<_> = log.iter().unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (LogKey::data(0), value(0, b"new")));
    }

    #[test]
    fn test_seal_keeps_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TransactionLog::with_capacity(3, dir.path()).unwrap();
        for seq in 0..7 {
            log.put(LogKey::data(seq), value(seq, b"s")).unwrap();
        }
        let sealed = log.seal().unwrap();
        assert_eq!(sealed.len(), 7);
        for seq in 0..7 {
            assert!(sealed.get(&LogKey::data(seq)).unwrap().is_some());
        }
    }

    #[test]
    fn test_close_deletes_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TransactionLog::with_capacity(1, dir.path()).unwrap();
        log.put(LogKey::data(0), value(0, b"a")).unwrap();
        log.put(LogKey::data(1), value(1, b"b")).unwrap();
        log.close().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
