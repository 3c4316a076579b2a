//! FileBackend - Append-only page file with a memory-mapped read path.
//!
//! ## File Layout
//!
//! ```text
//! offset 0   header (64 bytes)
//!            [0..8)   magic
//!            [8..12)  format version
//!            [12..16) reserved
//!            [16..24) root key
//!            [24..32) publish counter
//!            [60..64) crc32 of bytes [0..60)
//! offset 64  frames: [u32 len][u32 crc32][len bytes] ...
//! ```
//!
//! A storage key is the file offset of its frame. Frames are only ever
//! appended, so a key stays valid for the lifetime of the file.
//!
//! ## Durability
//!
//! `write_root_bytes` appends the root frame, syncs the file, then rewrites
//! the header and syncs again. The header rewrite is the publish point: a
//! crash before it leaves the previous root in place and the frames written
//! since then unreachable.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::{DbError, DbMetrics, Result, StorageKey};
use super::backend::Backend;

/// Size of the file header.
pub const FILE_HEADER_SIZE: usize = 64;

/// Size of a frame header (length and checksum).
pub const FRAME_HEADER_SIZE: usize = 8;

const MAGIC: [u8; 8] = *b"REVTRIE\0";
const FORMAT_VERSION: u32 = 1;
const HEADER_CRC_OFFSET: usize = FILE_HEADER_SIZE - 4;

struct FileWriter {
    file: File,
    end: u64,
    publishes: u64,
}

/// Page store backed by a single file.
pub struct FileBackend {
    path: PathBuf,
    writer: Mutex<FileWriter>,
    /// Handle used for (re)mapping; shares the open file description.
    map_source: File,
    map: RwLock<Mmap>,
    root: AtomicU64,
    metrics: DbMetrics,
}

impl FileBackend {
    /// Opens or creates a page file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        let (root, publishes) = if len == 0 {
            file.write_all(&encode_header(0, 0))?;
            file.sync_all()?;
            info!(path = %path.display(), "file_backend.created");
            (0, 0)
        } else {
            if len < FILE_HEADER_SIZE as u64 {
                return Err(DbError::Corrupted("page file shorter than its header"));
            }
            let mut header = [0u8; FILE_HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut header)?;
            let (root, publishes) = decode_header(&header)?;
            if root != 0 && (root < FILE_HEADER_SIZE as u64 || root >= len) {
                return Err(DbError::Corrupted("root key outside the page file"));
            }
            info!(path = %path.display(), root, publishes, len, "file_backend.opened");
            (root, publishes)
        };

        let end = file.metadata()?.len();
        let map_source = file.try_clone()?;
        // Safety: the mapped region is never written through this mapping and
        // frames below `end` are immutable once appended.
        let map = unsafe { Mmap::map(&map_source)? };

        Ok(Self {
            path,
            writer: Mutex::new(FileWriter {
                file,
                end,
                publishes,
            }),
            map_source,
            map: RwLock::new(map),
            root: AtomicU64::new(root),
            metrics: DbMetrics::new(),
        })
    }

    /// Path of the page file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the page file in bytes.
    pub fn file_len(&self) -> u64 {
        self.writer.lock().end
    }

    fn append_frame(writer: &mut FileWriter, bytes: &[u8]) -> Result<StorageKey> {
        let len = u32::try_from(bytes.len()).map_err(|_| DbError::inconsistent("page exceeds 4 GiB"))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + bytes.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(bytes).to_le_bytes());
        frame.extend_from_slice(bytes);

        let offset = writer.end;
        writer.file.seek(SeekFrom::Start(offset))?;
        writer.file.write_all(&frame)?;
        writer.end += frame.len() as u64;
        Ok(StorageKey::new(offset))
    }

    fn frame_at(map: &[u8], offset: u64) -> Result<Option<Vec<u8>>> {
        let Some(start) = usize::try_from(offset).ok() else {
            return Ok(None);
        };
        let Some(body_start) = start.checked_add(FRAME_HEADER_SIZE) else {
            return Ok(None);
        };
        let Some(header) = map.get(start..body_start) else {
            return Ok(None);
        };
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let Some(body) = body_start
            .checked_add(len)
            .and_then(|end| map.get(body_start..end))
        else {
            return Ok(None);
        };
        if crc32fast::hash(body) != crc {
            return Err(DbError::Corrupted("page frame checksum mismatch"));
        }
        Ok(Some(body.to_vec()))
    }
}

impl Backend for FileBackend {
    fn write_bytes(&self, bytes: &[u8]) -> Result<StorageKey> {
        let mut writer = self.writer.lock();
        let key = Self::append_frame(&mut writer, bytes)?;
        self.metrics.record_write(bytes.len());
        Ok(key)
    }

    fn write_root_bytes(&self, bytes: &[u8]) -> Result<StorageKey> {
        let mut writer = self.writer.lock();
        let key = Self::append_frame(&mut writer, bytes)?;
        writer.file.sync_data()?;

        let publishes = writer.publishes + 1;
        writer.file.seek(SeekFrom::Start(0))?;
        writer.file.write_all(&encode_header(key.raw(), publishes))?;
        writer.file.sync_data()?;
        writer.publishes = publishes;

        self.root.store(key.raw(), Ordering::Release);
        self.metrics.record_write(bytes.len());
        debug!(root = key.raw(), publishes, "file_backend.root_published");
        Ok(key)
    }

    fn read_bytes(&self, key: StorageKey) -> Result<Vec<u8>> {
        if key.raw() < FILE_HEADER_SIZE as u64 {
            return Err(DbError::PageNotFound(key));
        }

        {
            let map = self.map.read();
            if let Some(bytes) = Self::frame_at(&map, key.raw())? {
                self.metrics.record_read(bytes.len());
                return Ok(bytes);
            }
        }

        // The frame lies past the mapped length: remap the grown file.
        let mut map = self.map.write();
        if let Some(bytes) = Self::frame_at(&map, key.raw())? {
            self.metrics.record_read(bytes.len());
            return Ok(bytes);
        }
        // Safety: see `open`.
        *map = unsafe { Mmap::map(&self.map_source)? };
        let bytes = Self::frame_at(&map, key.raw())?.ok_or(DbError::PageNotFound(key))?;
        self.metrics.record_read(bytes.len());
        Ok(bytes)
    }

    fn root_key(&self) -> Result<Option<StorageKey>> {
        let raw = self.root.load(Ordering::Acquire);
        Ok((raw != 0).then_some(StorageKey::new(raw)))
    }

    fn close(&self) -> Result<()> {
        let writer = self.writer.lock();
        writer.file.sync_all()?;
        debug!(path = %self.path.display(), end = writer.end, "file_backend.closed");
        Ok(())
    }

    fn metrics(&self) -> &DbMetrics {
        &self.metrics
    }
}

fn encode_header(root: u64, publishes: u64) -> [u8; FILE_HEADER_SIZE] {
    let mut header = [0u8; FILE_HEADER_SIZE];
    header[0..8].copy_from_slice(&MAGIC);
    header[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    StorageKey::new(root).write(&mut header[16..24]);
    header[24..32].copy_from_slice(&publishes.to_le_bytes());
    let crc = crc32fast::hash(&header[..HEADER_CRC_OFFSET]);
    header[HEADER_CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
    header
}

fn decode_header(header: &[u8; FILE_HEADER_SIZE]) -> Result<(u64, u64)> {
    if header[0..8] != MAGIC {
        return Err(DbError::Corrupted("bad page file magic"));
    }
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&header[HEADER_CRC_OFFSET..]);
    if crc32fast::hash(&header[..HEADER_CRC_OFFSET]) != u32::from_le_bytes(crc) {
        return Err(DbError::Corrupted("page file header checksum mismatch"));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&header[8..12]);
    if u32::from_le_bytes(version) != FORMAT_VERSION {
        return Err(DbError::Corrupted("unsupported page file version"));
    }
    let root = StorageKey::read(&header[16..24]).raw();
    let mut publishes = [0u8; 8];
    publishes.copy_from_slice(&header[24..32]);
    Ok((root, u64::from_le_bytes(publishes)))
}
