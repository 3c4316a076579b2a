//! Page codec - Little-endian serialization of pages.
//!
//! Layout:
//!
//! ```text
//! u8                kind
//! u8                format version
//! u64               revision
//! u8 x slots        reference flag: 0 absent, 1 persisted, 2 staged
//! (u64, [u8; 32])   key and hash of every persisted reference, in slot order
//! payload           kind specific, see below
//! ```
//!
//! Payloads:
//!
//! - Uber: `u64` revision count, `u8` bootstrap flag
//! - Indirect: empty
//! - RevisionRoot: `u64` record count, `u64` max record key, `u64` timestamp
//! - Name: `u32` entry count, then `i32` key, `u32` length and UTF-8 bytes per entry
//! - Data: 16-byte presence bitmap, then `u32` length and bytes per present slot
//!
//! Staged references are encoded so that transaction logs can spill
//! in-flight pages. Backends refuse pages that still carry them.

use crate::data::{NameTable, Record, RecordSlots, PAGE_RECORD_COUNT};
use crate::merkle::{Hash, HASH_SIZE};

use super::{DbError, Page, PageKind, PageReference, Payload, Result, RevisionMeta, StorageKey, UberMeta};

/// The current version of the page format.
pub const CURRENT_VERSION: u8 = 1;

/// Size of the fixed header (kind, version, revision).
pub const HEADER_SIZE: usize = 10;

const FLAG_ABSENT: u8 = 0;
const FLAG_PERSISTED: u8 = 1;
const FLAG_STAGED: u8 = 2;

const BITMAP_SIZE: usize = PAGE_RECORD_COUNT / 8;

/// Serializes a page.
///
/// Fails with `InconsistentState` for a reference that holds an in-memory
/// page without a storage key, since such a child cannot be addressed.
pub fn encode(page: &Page) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded_size_hint(page));
    out.push(page.kind() as u8);
    out.push(CURRENT_VERSION);
    out.extend_from_slice(&page.revision().to_le_bytes());

    for reference in page.references() {
        let flag = if reference.is_persisted() {
            FLAG_PERSISTED
        } else if reference.is_staged() {
            FLAG_STAGED
        } else if reference.is_empty() {
            FLAG_ABSENT
        } else {
            return Err(DbError::inconsistent(
                "reference to an in-memory page without a storage key",
            ));
        };
        out.push(flag);
    }

    for reference in page.references() {
        if let (Some(key), Some(hash)) = (reference.key(), reference.hash()) {
            out.extend_from_slice(&key.raw().to_le_bytes());
            out.extend_from_slice(hash);
        }
    }

    match page.payload() {
        Payload::Uber(meta) => {
            out.extend_from_slice(&meta.revision_count.to_le_bytes());
            out.push(meta.bootstrap as u8);
        }
        Payload::Indirect => {}
        Payload::RevisionRoot(meta) => {
            out.extend_from_slice(&meta.revision_size.to_le_bytes());
            out.extend_from_slice(&meta.max_record_key.to_le_bytes());
            out.extend_from_slice(&meta.timestamp.to_le_bytes());
        }
        Payload::Name(names) => {
            out.extend_from_slice(&length_prefix(names.len(), "name table")?.to_le_bytes());
            for (key, name) in names.iter() {
                out.extend_from_slice(&key.to_le_bytes());
                out.extend_from_slice(&length_prefix(name.len(), "name")?.to_le_bytes());
                out.extend_from_slice(name.as_bytes());
            }
        }
        Payload::Data(slots) => {
            let mut bitmap = [0u8; BITMAP_SIZE];
            for (slot, _) in slots.iter() {
                bitmap[slot / 8] |= 1 << (slot % 8);
            }
            out.extend_from_slice(&bitmap);
            for (_, record) in slots.iter() {
                out.extend_from_slice(&length_prefix(record.len(), "record")?.to_le_bytes());
                out.extend_from_slice(record.as_bytes());
            }
        }
    }

    Ok(out)
}

/// Converts a length to its `u32` wire prefix.
pub(crate) fn length_prefix(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| DbError::inconsistent(format!("{what} length {len} exceeds u32")))
}

/// Deserializes a page.
///
/// Truncated, oversized or otherwise malformed input yields `Corrupted`.
pub fn decode(data: &[u8]) -> Result<Page> {
    let mut reader = Reader::new(data);

    let kind = PageKind::from_u8(reader.u8()?).ok_or(DbError::Corrupted("unknown page kind"))?;
    if reader.u8()? != CURRENT_VERSION {
        return Err(DbError::Corrupted("unsupported page format version"));
    }
    let revision = reader.u64()?;

    let count = kind.reference_count();
    let flags = reader.bytes(count)?.to_vec();
    let mut references = Vec::with_capacity(count);
    for flag in flags {
        let reference = match flag {
            FLAG_ABSENT => PageReference::empty(),
            FLAG_STAGED => PageReference::staged(),
            FLAG_PERSISTED => {
                let key = StorageKey::new(reader.u64()?);
                let mut hash: Hash = [0u8; HASH_SIZE];
                hash.copy_from_slice(reader.bytes(HASH_SIZE)?);
                PageReference::persisted(key, hash)
            }
            _ => return Err(DbError::Corrupted("invalid reference flag")),
        };
        references.push(reference);
    }

    let payload = match kind {
        PageKind::Uber => {
            let revision_count = reader.u64()?;
            let bootstrap = match reader.u8()? {
                0 => false,
                1 => true,
                _ => return Err(DbError::Corrupted("invalid bootstrap flag")),
            };
            Payload::Uber(UberMeta {
                revision_count,
                bootstrap,
            })
        }
        PageKind::Indirect => Payload::Indirect,
        PageKind::RevisionRoot => Payload::RevisionRoot(RevisionMeta {
            revision_size: reader.u64()?,
            max_record_key: reader.u64()?,
            timestamp: reader.u64()?,
        }),
        PageKind::Name => {
            let entries = reader.u32()? as usize;
            let mut names = NameTable::new();
            let mut previous = None;
            for _ in 0..entries {
                let key = reader.i32()?;
                if previous.is_some_and(|p| p >= key) {
                    return Err(DbError::Corrupted("name keys out of order"));
                }
                previous = Some(key);
                let len = reader.u32()? as usize;
                let name = std::str::from_utf8(reader.bytes(len)?)
                    .map_err(|_| DbError::Corrupted("name is not valid UTF-8"))?;
                names.insert(key, name);
            }
            Payload::Name(names)
        }
        PageKind::Data => {
            let mut bitmap = [0u8; BITMAP_SIZE];
            bitmap.copy_from_slice(reader.bytes(BITMAP_SIZE)?);
            let mut slots = RecordSlots::new();
            for slot in 0..PAGE_RECORD_COUNT {
                if bitmap[slot / 8] & (1 << (slot % 8)) != 0 {
                    let len = reader.u32()? as usize;
                    slots.set(slot, Record::new(reader.bytes(len)?));
                }
            }
            Payload::Data(slots)
        }
    };

    if !reader.is_done() {
        return Err(DbError::Corrupted("trailing bytes after page"));
    }

    Page::from_parts(revision, references, payload)
}

fn encoded_size_hint(page: &Page) -> usize {
    let refs = page.references();
    let persisted = refs.iter().filter(|r| r.is_persisted()).count();
    HEADER_SIZE + refs.len() + persisted * (StorageKey::SIZE + HASH_SIZE) + 64
}

/// Bounds-checked little-endian cursor.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DbError::Corrupted("truncated page"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn i32(&mut self) -> Result<i32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bytes(4)?);
        Ok(i32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn is_done(&self) -> bool {
        self.pos == self.data.len()
    }
}
