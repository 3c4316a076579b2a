//! End-to-end tests of the storage engine.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::commit::{CommitStrategy, StorageConfig};
use crate::data::{LEVELS, MAX_SEQUENCE};
use crate::log::LogKey;
use crate::store::{
    Backend, DbError, DbMetrics, MemoryBackend, Page, Result, Storage, StorageKey,
};

/// Memory backend whose root writes can be held back or made to fail.
struct GatedBackend {
    inner: MemoryBackend,
    open: Mutex<bool>,
    cv: Condvar,
    failures: AtomicUsize,
}

impl GatedBackend {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            open: Mutex::new(true),
            cv: Condvar::new(),
            failures: AtomicUsize::new(0),
        }
    }

    fn close_gate(&self) {
        *self.open.lock() = false;
    }

    fn open_gate(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }

    fn fail_next_root(&self) {
        self.failures.store(1, Ordering::SeqCst);
    }
}

impl Backend for GatedBackend {
    fn write_bytes(&self, bytes: &[u8]) -> Result<StorageKey> {
        self.inner.write_bytes(bytes)
    }

    fn write_root_bytes(&self, bytes: &[u8]) -> Result<StorageKey> {
        {
            let mut open = self.open.lock();
            while !*open {
                self.cv.wait(&mut open);
            }
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DbError::Io(io::Error::new(io::ErrorKind::Other, "injected failure")));
        }
        self.inner.write_root_bytes(bytes)
    }

    fn read_bytes(&self, key: StorageKey) -> Result<Vec<u8>> {
        self.inner.read_bytes(key)
    }

    fn root_key(&self) -> Result<Option<StorageKey>> {
        self.inner.root_key()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }

    fn metrics(&self) -> &DbMetrics {
        self.inner.metrics()
    }
}

/// Collects the storage keys of every page reachable from `key`.
fn reachable(backend: &dyn Backend, key: StorageKey, out: &mut HashSet<StorageKey>) {
    if !out.insert(key) {
        return;
    }
    let page: Page = backend.read(key).unwrap();
    for reference in page.references() {
        if let Some(child) = reference.key() {
            reachable(backend, child, out);
        }
    }
}

fn reachable_from_root(backend: &dyn Backend) -> HashSet<StorageKey> {
    let mut keys = HashSet::new();
    reachable(backend, backend.root_key().unwrap().unwrap(), &mut keys);
    keys
}

fn put(storage: &Storage, key: u64, value: &[u8]) {
    let mut trx = storage.begin_write().unwrap();
    trx.set_record(key, value).unwrap();
    trx.commit().unwrap().wait().unwrap();
}

#[test]
fn test_bootstrap_state() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    assert_eq!(storage.latest_revision().unwrap(), 0);
    assert_eq!(storage.revision_count().unwrap(), 1);

    let reader = storage.begin_read().unwrap();
    assert_eq!(reader.revision(), 0);
    assert_eq!(reader.get_record(0).unwrap().unwrap().as_bytes(), b"");
    assert_eq!(reader.revision_size().unwrap(), 1);
    assert_eq!(reader.max_record_key().unwrap(), 0);
    assert!(reader.get_record(1).unwrap().is_none());
    assert!(reader.get_name(0).unwrap().is_none());
    assert!(reader.timestamp().unwrap() > 0);
}

#[test]
fn test_insert_root_record() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    put(&storage, 0, b"root record");

    assert_eq!(storage.revision_count().unwrap(), 2);
    let reader = storage.begin_read().unwrap();
    assert_eq!(reader.revision(), 1);
    assert_eq!(reader.max_record_key().unwrap(), 0);
    assert_eq!(reader.revision_size().unwrap(), 1);
    assert_eq!(reader.get_record(0).unwrap().unwrap().as_bytes(), b"root record");
}

#[test]
fn test_disjoint_leaves_keep_history() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    let far = 500 * 128 + 3;
    put(&storage, 10, b"first");
    put(&storage, far, b"second");

    let first = storage.begin_read_at(1).unwrap();
    assert_eq!(first.get_record(10).unwrap().unwrap().as_bytes(), b"first");
    assert!(first.get_record(far).unwrap().is_none());
    assert!(first.resolve_page(500).unwrap().is_none());

    let second = storage.begin_read_at(2).unwrap();
    assert_eq!(second.get_record(10).unwrap().unwrap().as_bytes(), b"first");
    assert_eq!(second.get_record(far).unwrap().unwrap().as_bytes(), b"second");

    // The untouched leaf is the very same page in both revisions.
    let a = first.resolve_page(0).unwrap().unwrap();
    let b = second.resolve_page(0).unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_transaction_stats() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    let mut trx = storage.begin_write().unwrap();
    trx.set_record(500 * 128, b"far").unwrap();

    let stats = trx.stats();
    // New leaf and its last indirect page; the rest of both paths is cloned.
    assert_eq!(stats.pages_allocated, 2);
    assert_eq!(stats.pages_cloned, 2 * LEVELS as u64 - 1);
    assert_eq!(stats.staged_pages, 2 * LEVELS + 1);
    assert_eq!(stats.spills, 0);
    trx.abort().unwrap();
}

#[test]
fn test_reader_isolated_from_later_commits() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    put(&storage, 5, b"v1");

    let reader = storage.begin_read().unwrap();
    put(&storage, 5, b"v2");
    put(&storage, 6, b"other");

    assert_eq!(reader.revision(), 1);
    assert_eq!(reader.get_record(5).unwrap().unwrap().as_bytes(), b"v1");
    assert!(reader.get_record(6).unwrap().is_none());

    let latest = storage.begin_read().unwrap();
    assert_eq!(latest.get_record(5).unwrap().unwrap().as_bytes(), b"v2");
}

#[test]
fn test_single_record_commit_shares_everything_else() {
    let backend = Arc::new(MemoryBackend::new());
    let storage = Storage::open(backend.clone(), StorageConfig::default()).unwrap();
    for key in [1u64, 200, 300, 5000] {
        put(&storage, key, b"seed");
    }
    let before = reachable_from_root(backend.as_ref());

    let mut trx = storage.begin_write().unwrap();
    trx.set_record(1000, b"z").unwrap();
    let info = trx.commit().unwrap().wait().unwrap();
    let after = reachable_from_root(backend.as_ref());

    // Record path, RevisionRoot, revision path and Uber page.
    let expected = 2 * LEVELS + 3;
    assert_eq!(info.pages_written, expected);
    assert_eq!(after.difference(&before).count(), expected);
    // Only the previous Uber page and its revision path fall out of reach.
    assert_eq!(before.difference(&after).count(), LEVELS + 1);
}

#[test]
fn test_hash_rollup_verifies() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    put(&storage, 1, b"a");
    let mut trx = storage.begin_write().unwrap();
    trx.set_record(129, b"b").unwrap();
    trx.set_name(1, "one").unwrap();
    let info = trx.commit().unwrap().wait().unwrap();

    assert_eq!(storage.root_hash().unwrap(), info.root_hash);
    let report = storage.verify_integrity().unwrap();
    assert!(report.pages_verified > 2 * LEVELS);
}

#[test]
fn test_log_spills_under_small_cache() {
    let config = StorageConfig::default().with_log_cache_capacity(2);
    let storage = Storage::in_memory(config).unwrap();

    let mut trx = storage.begin_write().unwrap();
    for page in 0..20u64 {
        trx.set_record(page * 128 + 1, format!("page {}", page).as_bytes()).unwrap();
    }
    assert!(trx.stats().spills > 0);
    for page in 0..20u64 {
        let record = trx.get_record(page * 128 + 1).unwrap().unwrap();
        assert_eq!(record.as_bytes(), format!("page {}", page).as_bytes());
    }
    trx.commit().unwrap().wait().unwrap();

    assert!(storage.metrics().snapshot().log_spills > 0);
    let reader = storage.begin_read().unwrap();
    for page in 0..20u64 {
        let record = reader.get_record(page * 128 + 1).unwrap().unwrap();
        assert_eq!(record.as_bytes(), format!("page {}", page).as_bytes());
    }
    assert_eq!(reader.revision_size().unwrap(), 21);
    storage.verify_integrity().unwrap();
}

#[test]
fn test_non_blocking_commit_serves_former_reads() {
    let backend = Arc::new(GatedBackend::new());
    let storage = Storage::open(backend.clone(), StorageConfig::non_blocking()).unwrap();
    backend.close_gate();

    let mut trx = storage.begin_write().unwrap();
    trx.set_record(300, b"in flight").unwrap();
    let handle = trx.commit().unwrap();

    assert!(!handle.is_finished());
    assert_eq!(storage.latest_revision().unwrap(), 0);
    let staged = storage.get_former(&LogKey::data(300 >> 7)).unwrap().unwrap();
    let record = staged.modified.records().unwrap().get(300 & 127).cloned().unwrap();
    assert_eq!(record.as_bytes(), b"in flight");

    // The next writer builds on the in-flight revision.
    let mut next = storage.begin_write().unwrap();
    assert_eq!(next.revision(), 2);
    assert_eq!(next.get_record(300).unwrap().unwrap().as_bytes(), b"in flight");
    next.set_record(301, b"second").unwrap();

    backend.open_gate();
    assert_eq!(handle.wait().unwrap().revision, 1);
    next.commit().unwrap().wait().unwrap();
    assert!(storage.get_former(&LogKey::data(2)).unwrap().is_none());

    let reader = storage.begin_read().unwrap();
    assert_eq!(reader.revision(), 2);
    assert_eq!(reader.get_record(300).unwrap().unwrap().as_bytes(), b"in flight");
    assert_eq!(reader.get_record(301).unwrap().unwrap().as_bytes(), b"second");
    storage.verify_integrity().unwrap();
    storage.close().unwrap();
}

#[test]
fn test_close_times_out_on_stuck_commit() {
    let backend = Arc::new(GatedBackend::new());
    let config = StorageConfig::non_blocking().with_close_timeout(Duration::from_millis(50));
    let storage = Storage::open(backend.clone(), config).unwrap();
    backend.close_gate();

    let mut trx = storage.begin_write().unwrap();
    trx.set_record(1, b"stuck").unwrap();
    let handle = trx.commit().unwrap();

    let err = storage.close().unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(storage.begin_write().unwrap().commit(), Err(DbError::Closed)));

    backend.open_gate();
    assert_eq!(handle.wait().unwrap().revision, 1);
}

#[test]
fn test_failed_commit_keeps_published_revision() {
    let backend = Arc::new(GatedBackend::new());
    let storage = Storage::open(backend.clone(), StorageConfig::default()).unwrap();
    backend.fail_next_root();

    let mut trx = storage.begin_write().unwrap();
    trx.set_record(7, b"lost").unwrap();
    assert!(matches!(trx.commit(), Err(DbError::Io(_))));
    assert_eq!(storage.latest_revision().unwrap(), 0);
    assert_eq!(storage.metrics().snapshot().commits_failed, 1);

    let mut trx = storage.begin_write().unwrap();
    assert_eq!(trx.revision(), 1);
    assert!(trx.get_record(7).unwrap().is_none());
    trx.set_record(8, b"kept").unwrap();
    trx.commit().unwrap().wait().unwrap();

    let reader = storage.begin_read().unwrap();
    assert!(reader.get_record(7).unwrap().is_none());
    assert_eq!(reader.get_record(8).unwrap().unwrap().as_bytes(), b"kept");
}

#[test]
fn test_failed_background_commit_rolls_back_head() {
    let backend = Arc::new(GatedBackend::new());
    let storage = Storage::open(backend.clone(), StorageConfig::non_blocking()).unwrap();
    backend.fail_next_root();

    let mut trx = storage.begin_write().unwrap();
    trx.set_record(7, b"lost").unwrap();
    let handle = trx.commit().unwrap();
    assert!(matches!(handle.wait(), Err(DbError::CommitFailed(_))));
    assert!(storage.get_former(&LogKey::data(0)).unwrap().is_none());

    let mut trx = storage.begin_write().unwrap();
    assert_eq!(trx.revision(), 1);
    trx.set_record(8, b"kept").unwrap();
    trx.commit().unwrap().wait().unwrap();
    assert_eq!(storage.latest_revision().unwrap(), 1);
    assert!(storage.begin_read().unwrap().get_record(7).unwrap().is_none());
}

#[test]
fn test_single_writer() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    let trx = storage.begin_write().unwrap();
    assert!(matches!(storage.begin_write(), Err(DbError::WriterActive)));
    trx.abort().unwrap();

    let mut trx = storage.begin_write().unwrap();
    assert_eq!(trx.revision(), 1);
    trx.set_record(1, b"x").unwrap();
    trx.abort().unwrap();

    assert_eq!(storage.latest_revision().unwrap(), 0);
    assert!(storage.begin_read().unwrap().get_record(1).unwrap().is_none());
    assert_eq!(storage.metrics().snapshot().transactions_aborted, 2);
}

#[test]
fn test_create_and_remove_records() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    let mut trx = storage.begin_write().unwrap();
    assert_eq!(trx.create_record(b"one").unwrap(), 1);
    assert_eq!(trx.create_record(b"two").unwrap(), 2);
    assert_eq!(trx.revision_size().unwrap(), 3);
    trx.commit().unwrap().wait().unwrap();

    let mut trx = storage.begin_write().unwrap();
    assert_eq!(trx.remove_record(1).unwrap().unwrap().as_bytes(), b"one");
    assert!(trx.remove_record(1).unwrap().is_none());
    assert!(trx.remove_record(99).unwrap().is_none());
    trx.commit().unwrap().wait().unwrap();

    let reader = storage.begin_read().unwrap();
    assert!(reader.get_record(1).unwrap().is_none());
    assert_eq!(reader.get_record(2).unwrap().unwrap().as_bytes(), b"two");
    assert_eq!(reader.revision_size().unwrap(), 2);
    assert_eq!(reader.max_record_key().unwrap(), 2);

    let historical = storage.begin_read_at(1).unwrap();
    assert_eq!(historical.get_record(1).unwrap().unwrap().as_bytes(), b"one");
}

#[test]
fn test_names() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    let mut trx = storage.begin_write().unwrap();
    trx.set_name(7, "seven").unwrap();
    trx.set_name(-1, "minus one").unwrap();
    assert_eq!(trx.get_name(7).unwrap().as_deref(), Some("seven"));
    trx.commit().unwrap().wait().unwrap();

    let mut trx = storage.begin_write().unwrap();
    assert_eq!(trx.remove_name(7).unwrap().as_deref(), Some("seven"));
    assert!(trx.remove_name(7).unwrap().is_none());
    trx.commit().unwrap().wait().unwrap();

    let reader = storage.begin_read().unwrap();
    assert!(reader.get_name(7).unwrap().is_none());
    assert_eq!(reader.get_name(-1).unwrap().as_deref(), Some("minus one"));
    let historical = storage.begin_read_at(1).unwrap();
    assert_eq!(historical.get_name(7).unwrap().as_deref(), Some("seven"));
}

#[test]
fn test_historical_revisions() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    for revision in 1..=3u64 {
        put(&storage, 1, format!("r{}", revision).as_bytes());
    }

    for revision in 1..=3u64 {
        let reader = storage.begin_read_at(revision).unwrap();
        assert_eq!(reader.revision(), revision);
        let expected = format!("r{}", revision);
        assert_eq!(reader.get_record(1).unwrap().unwrap().as_bytes(), expected.as_bytes());
    }
    let genesis = storage.begin_read_at(0).unwrap();
    assert!(genesis.get_record(1).unwrap().is_none());
    assert!(matches!(storage.begin_read_at(4), Err(DbError::RevisionNotFound(4))));
}

#[test]
fn test_out_of_range_keys() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    let mut trx = storage.begin_write().unwrap();
    let key = MAX_SEQUENCE << 7;
    assert!(matches!(trx.set_record(key, b"x"), Err(DbError::OutOfRange(_))));
    assert!(trx.set_record(key - 1, b"last").is_ok());
    trx.commit().unwrap().wait().unwrap();

    let reader = storage.begin_read().unwrap();
    assert!(matches!(reader.get_record(u64::MAX), Err(DbError::OutOfRange(_))));
    assert_eq!(reader.get_record(key - 1).unwrap().unwrap().as_bytes(), b"last");
}

#[test]
fn test_blocking_override_on_non_blocking_store() {
    let storage = Storage::in_memory(StorageConfig::non_blocking()).unwrap();
    let mut trx = storage.begin_write().unwrap();
    trx.set_record(3, b"now").unwrap();
    let handle = trx.commit_with(CommitStrategy::Blocking).unwrap();
    assert!(handle.is_finished());
    assert_eq!(storage.latest_revision().unwrap(), 1);
}

#[test]
fn test_non_blocking_request_on_blocking_store_commits_inline() {
    let storage = Storage::in_memory(StorageConfig::default()).unwrap();
    let mut trx = storage.begin_write().unwrap();
    trx.set_record(3, b"inline").unwrap();
    let handle = trx.commit_with(CommitStrategy::NonBlocking).unwrap();
    assert!(handle.is_finished());
    assert_eq!(handle.wait().unwrap().revision, 1);
    assert_eq!(storage.latest_revision().unwrap(), 1);
    assert!(storage.get_former(&LogKey::data(0)).unwrap().is_none());
}

#[test]
fn test_concurrent_readers() {
    let storage = Storage::in_memory(StorageConfig::non_blocking()).unwrap();
    put(&storage, 1, b"0");

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let reader = storage.begin_read().unwrap();
                    let value = reader.get_record(1).unwrap().unwrap();
                    let expected = format!("{}", reader.revision() - 1);
                    assert_eq!(value.as_bytes(), expected.as_bytes());
                }
            });
        }
        for revision in 2..20u64 {
            put(&storage, 1, format!("{}", revision - 1).as_bytes());
        }
    });
    storage.sync().unwrap();
    assert_eq!(storage.latest_revision().unwrap(), 19);
}

#[test]
fn test_file_storage_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let config = StorageConfig::default().with_log_dir(dir.path());

    let info = {
        let storage = Storage::open_file(&path, config.clone()).unwrap();
        put(&storage, 1, b"persisted");
        let mut trx = storage.begin_write().unwrap();
        trx.set_name(3, "three").unwrap();
        let info = trx.commit().unwrap().wait().unwrap();
        storage.close().unwrap();
        info
    };

    let storage = Storage::open_file(&path, config).unwrap();
    assert_eq!(storage.latest_revision().unwrap(), 2);
    assert_eq!(storage.root_hash().unwrap(), info.root_hash);
    let reader = storage.begin_read().unwrap();
    assert_eq!(reader.get_record(1).unwrap().unwrap().as_bytes(), b"persisted");
    assert_eq!(reader.get_name(3).unwrap().as_deref(), Some("three"));
    assert!(storage.begin_read_at(0).unwrap().get_record(1).unwrap().is_none());
    storage.verify_integrity().unwrap();

    put(&storage, 2, b"after reopen");
    assert_eq!(storage.latest_revision().unwrap(), 3);
}
