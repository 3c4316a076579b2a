//! Overflow store - File-backed spill area of a transaction log.
//!
//! Entries evicted from the log's cache are appended to an anonymous temp
//! file as checksummed frames:
//!
//! ```text
//! [u32 len][u32 crc32][LogKey (10 bytes)][LogValue bytes]
//! ```
//!
//! `len` covers the key and value, and the checksum is computed over the
//! same bytes. An in-memory index maps each key to its latest frame, so a
//! key written twice resolves to the last write. The file is removed when
//! the store is dropped or closed.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::Mmap;
use tempfile::NamedTempFile;

use super::{LogKey, LogValue, LOG_KEY_SIZE};
use crate::store::{DbError, Result};

/// Size of a frame header.
const FRAME_HEADER_SIZE: usize = 8;

/// Location of a frame in the overflow file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FrameRef {
    offset: u64,
    len: u32,
}

impl FrameRef {
    fn total_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.len as usize
    }
}

/// Append-only spill file for log entries.
pub struct OverflowStore {
    file: NamedTempFile,
    index: BTreeMap<LogKey, FrameRef>,
    end: u64,
}

impl OverflowStore {
    /// Creates an empty store in `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("revtrie-log-")
            .suffix(".spill")
            .tempfile_in(dir)?;
        Ok(Self {
            file,
            index: BTreeMap::new(),
            end: 0,
        })
    }

    /// Appends an entry, superseding any earlier frame for the same key.
    pub fn put(&mut self, key: LogKey, value: &LogValue) -> Result<()> {
        let body = value.encode()?;
        let len = u32::try_from(LOG_KEY_SIZE + body.len())
            .map_err(|_| DbError::inconsistent("log entry exceeds 4 GiB"))?;

        let mut frame = vec![0u8; FRAME_HEADER_SIZE + LOG_KEY_SIZE];
        frame[0..4].copy_from_slice(&len.to_le_bytes());
        key.write(&mut frame[FRAME_HEADER_SIZE..]);
        frame.extend_from_slice(&body);
        let crc = crc32fast::hash(&frame[FRAME_HEADER_SIZE..]);
        frame[4..8].copy_from_slice(&crc.to_le_bytes());

        let offset = self.end;
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&frame)?;
        self.end += frame.len() as u64;
        self.index.insert(key, FrameRef { offset, len });
        Ok(())
    }

    /// Reads the latest entry for `key`.
    pub fn get(&mut self, key: &LogKey) -> Result<Option<LogValue>> {
        let Some(frame) = self.index.get(key).copied() else {
            return Ok(None);
        };
        let (stored, value) = read_frame(self.file.as_file_mut(), frame)?;
        check_key(&stored, key)?;
        Ok(Some(value))
    }

    pub fn contains(&self, key: &LogKey) -> bool {
        self.index.contains_key(key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes appended so far, superseded frames included.
    pub fn bytes_written(&self) -> u64 {
        self.end
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Iterates over the latest entry of every key in commit order.
    pub fn iter(&mut self) -> OverflowIter<'_> {
        OverflowIter {
            file: self.file.as_file_mut(),
            entries: self.index.iter(),
        }
    }

    /// Freezes the store into a read-only, shareable log.
    pub fn seal(self) -> Result<SealedLog> {
        self.file.as_file().sync_data()?;
        let map = if self.end == 0 {
            None
        } else {
            // Safety: the file is private to this store and no longer written.
            Some(unsafe { Mmap::map(self.file.as_file())? })
        };
        Ok(SealedLog {
            file: self.file,
            map,
            index: self.index,
        })
    }

    /// Deletes the spill file.
    pub fn close(self) -> Result<()> {
        self.file.close()?;
        Ok(())
    }
}

/// Iterator over the entries of an [`OverflowStore`].
pub struct OverflowIter<'a> {
    file: &'a mut File,
    entries: btree_map::Iter<'a, LogKey, FrameRef>,
}

impl Iterator for OverflowIter<'_> {
    type Item = Result<(LogKey, LogValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, frame) = self.entries.next()?;
        Some(read_frame(self.file, *frame).and_then(|(stored, value)| {
            check_key(&stored, key)?;
            Ok((stored, value))
        }))
    }
}

/// A transaction log frozen for commit.
///
/// The spill file is memory mapped, so lookups take `&self` and may run
/// from any thread while the commit is in flight.
pub struct SealedLog {
    file: NamedTempFile,
    map: Option<Mmap>,
    index: BTreeMap<LogKey, FrameRef>,
}

impl SealedLog {
    /// Reads the entry for `key`.
    pub fn get(&self, key: &LogKey) -> Result<Option<LogValue>> {
        let Some(frame) = self.index.get(key) else {
            return Ok(None);
        };
        let (stored, value) = self.frame(frame)?;
        check_key(&stored, key)?;
        Ok(Some(value))
    }

    pub fn contains(&self, key: &LogKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Keys in commit order.
    pub fn keys(&self) -> impl Iterator<Item = &LogKey> {
        self.index.keys()
    }

    /// Entries in commit order.
    pub fn iter(&self) -> impl Iterator<Item = Result<(LogKey, LogValue)>> + '_ {
        self.index.iter().map(move |(key, frame)| {
            let (stored, value) = self.frame(frame)?;
            check_key(&stored, key)?;
            Ok((stored, value))
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Deletes the spill file.
    pub fn close(self) -> Result<()> {
        drop(self.map);
        self.file.close()?;
        Ok(())
    }

    fn frame(&self, frame: &FrameRef) -> Result<(LogKey, LogValue)> {
        let map = self
            .map
            .as_deref()
            .ok_or(DbError::Corrupted("sealed log has no data"))?;
        let start = frame.offset as usize;
        let bytes = map
            .get(start..start + frame.total_len())
            .ok_or(DbError::Corrupted("log frame outside the spill file"))?;
        decode_frame(bytes)
    }
}

fn read_frame(file: &mut File, frame: FrameRef) -> Result<(LogKey, LogValue)> {
    let mut bytes = vec![0u8; frame.total_len()];
    file.seek(SeekFrom::Start(frame.offset))?;
    file.read_exact(&mut bytes)?;
    decode_frame(&bytes)
}

fn decode_frame(bytes: &[u8]) -> Result<(LogKey, LogValue)> {
    if bytes.len() < FRAME_HEADER_SIZE + LOG_KEY_SIZE {
        return Err(DbError::Corrupted("truncated log frame"));
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let crc = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let body = &bytes[FRAME_HEADER_SIZE..];
    if body.len() != len {
        return Err(DbError::Corrupted("log frame length mismatch"));
    }
    if crc32fast::hash(body) != crc {
        return Err(DbError::Corrupted("log frame checksum mismatch"));
    }
    let key = LogKey::read(body).ok_or(DbError::Corrupted("invalid log key"))?;
    let value = LogValue::decode(&body[LOG_KEY_SIZE..])?;
    Ok((key, value))
}

fn check_key(stored: &LogKey, expected: &LogKey) -> Result<()> {
    if stored == expected {
        Ok(())
    } else {
        Err(DbError::Corrupted("log frame holds a different key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use crate::store::Page;

    fn data_value(revision: u64, bytes: &[u8]) -> LogValue {
        let mut page = Page::new_data(revision);
        page.records_mut().unwrap().set(0, Record::new(bytes));
        LogValue::new(page, None)
    }

    #[test]
    fn test_put_get_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = OverflowStore::create(dir.path()).unwrap();
        assert_eq!(store.bytes_written(), 0);

        store.put(LogKey::data(1), &data_value(1, b"first")).unwrap();
        let after_first = store.bytes_written();
        assert!(after_first > 0);
        store.put(LogKey::data(1), &data_value(1, b"second")).unwrap();
        // The superseded frame stays in the file.
        assert!(store.bytes_written() > after_first);

        let value = store.get(&LogKey::data(1)).unwrap().unwrap();
        assert_eq!(value, data_value(1, b"second"));
        assert_eq!(store.len(), 1);
        assert!(store.get(&LogKey::data(2)).unwrap().is_none());
    }

    #[test]
    fn test_iter_in_commit_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = OverflowStore::create(dir.path()).unwrap();

        let keys = [LogKey::revision_root(0), LogKey::data(9), LogKey::name(), LogKey::data(2)];
        for key in keys {
            store.put(key, &LogValue::new(Page::empty(key.kind(), 0), None)).unwrap();
        }

        let order: Vec<LogKey> = store.iter().map(|e| e.unwrap().0).collect();
        assert_eq!(
            order,
            vec![LogKey::name(), LogKey::data(2), LogKey::data(9), LogKey::revision_root(0)]
        );
    }

    #[test]
    fn test_sealed_lookup_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = OverflowStore::create(dir.path()).unwrap();
        store.put(LogKey::data(3), &data_value(4, b"sealed")).unwrap();
        store.put(LogKey::name(), &LogValue::new(Page::empty(LogKey::name().kind(), 4), None)).unwrap();
        let path = store.path().to_path_buf();

        let sealed = store.seal().unwrap();
        let keys: Vec<LogKey> = sealed.keys().copied().collect();
        assert_eq!(keys, vec![LogKey::name(), LogKey::data(3)]);
        assert_eq!(sealed.get(&LogKey::data(3)).unwrap(), Some(data_value(4, b"sealed")));
        assert!(sealed.get(&LogKey::data(4)).unwrap().is_none());
        assert_eq!(sealed.iter().count(), 2);
        assert!(path.exists());

        sealed.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_seal() {
        let dir = tempfile::tempdir().unwrap();
        let sealed = OverflowStore::create(dir.path()).unwrap().seal().unwrap();
        assert!(sealed.is_empty());
        assert!(sealed.get(&LogKey::name()).unwrap().is_none());
    }

    #[test]
    fn test_close_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = OverflowStore::create(dir.path()).unwrap();
        let path = store.path().to_path_buf();
        assert!(path.exists());
        store.close().unwrap();
        assert!(!path.exists());
    }
}
