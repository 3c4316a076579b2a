//! LogKey - Logical coordinates of pages staged in a transaction log.
//!
//! A staged page has no storage key yet, so it is addressed by where it
//! sits in the trie: which space, which level, and the prefix of the
//! sequence numbers routed through it.
//!
//! ## Commit Order
//!
//! `Ord` on `LogKey` is the order pages must be written in so that every
//! child is written before its parent:
//!
//! 1. record space before revision space (the record space hangs below the
//!    RevisionRoot, which is the leaf of the revision space)
//! 2. deeper levels before shallower ones
//! 3. ascending prefix within a level

use std::cmp::Ordering;
use std::fmt;

use crate::data::{parent_prefix, slot_in_parent, LEVELS};
use crate::store::{PageKind, NAME_SLOT, RECORD_ROOT_SLOT, REVISION_ROOT_SLOT};

/// Serialized size of a key.
pub const LOG_KEY_SIZE: usize = 10;

/// Level used for the name page, deeper than any data page.
pub const NAME_LEVEL: u8 = LEVELS as u8 + 1;

/// The two tries of a revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TrieSpace {
    /// RevisionRoot to data pages, addressed by record page number.
    Record = 0,
    /// Uber page to RevisionRoot pages, addressed by revision number.
    Revision = 1,
}

/// Where a written page gets linked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parent {
    /// A slot of the Uber page.
    Uber(usize),
    /// A slot of another staged page.
    Log(LogKey, usize),
}

/// Logical address of a staged page.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogKey {
    pub space: TrieSpace,
    pub level: u8,
    pub seq: u64,
}

impl LogKey {
    /// Creates the key of a page in `space` at `level` with prefix `seq`.
    pub const fn new(space: TrieSpace, level: u8, seq: u64) -> Self {
        Self { space, level, seq }
    }

    /// Key of the data page holding record page `page_seq`.
    pub const fn data(page_seq: u64) -> Self {
        Self::new(TrieSpace::Record, LEVELS as u8, page_seq)
    }

    /// Key of the RevisionRoot of `revision`.
    pub const fn revision_root(revision: u64) -> Self {
        Self::new(TrieSpace::Revision, LEVELS as u8, revision)
    }

    /// Key of the name page.
    pub const fn name() -> Self {
        Self::new(TrieSpace::Record, NAME_LEVEL, 0)
    }

    pub fn is_name(&self) -> bool {
        *self == Self::name()
    }

    pub fn is_revision_root(&self) -> bool {
        self.space == TrieSpace::Revision && self.level as usize == LEVELS
    }

    /// Kind of page stored under this key.
    pub fn kind(&self) -> PageKind {
        if self.is_name() {
            PageKind::Name
        } else if (self.level as usize) < LEVELS {
            PageKind::Indirect
        } else {
            match self.space {
                TrieSpace::Record => PageKind::Data,
                TrieSpace::Revision => PageKind::RevisionRoot,
            }
        }
    }

    /// Returns where this page is linked once written.
    ///
    /// `revision` is the revision being committed, which names the
    /// RevisionRoot that roots the record space and the name page.
    pub fn parent(&self, revision: u64) -> Parent {
        if self.is_name() {
            return Parent::Log(LogKey::revision_root(revision), NAME_SLOT);
        }
        if self.level == 0 {
            return match self.space {
                TrieSpace::Record => Parent::Log(LogKey::revision_root(revision), RECORD_ROOT_SLOT),
                TrieSpace::Revision => Parent::Uber(REVISION_ROOT_SLOT),
            };
        }
        Parent::Log(
            LogKey::new(self.space, self.level - 1, parent_prefix(self.seq)),
            slot_in_parent(self.seq),
        )
    }

    /// Writes the key (little-endian).
    pub fn write(&self, dest: &mut [u8]) {
        assert!(dest.len() >= LOG_KEY_SIZE);
        dest[0] = self.space as u8;
        dest[1] = self.level;
        dest[2..10].copy_from_slice(&self.seq.to_le_bytes());
    }

    /// Reads a key, returning `None` for an invalid encoding.
    pub fn read(data: &[u8]) -> Option<Self> {
        if data.len() < LOG_KEY_SIZE {
            return None;
        }
        let space = match data[0] {
            0 => TrieSpace::Record,
            1 => TrieSpace::Revision,
            _ => return None,
        };
        let level = data[1];
        if level > NAME_LEVEL {
            return None;
        }
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&data[2..10]);
        Some(Self::new(space, level, u64::from_le_bytes(seq)))
    }
}

impl Ord for LogKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.space
            .cmp(&other.space)
            .then_with(|| other.level.cmp(&self.level))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for LogKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogKey({:?}, level={}, seq={})", self.space, self.level, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_sort_before_parents() {
        let leaf = LogKey::data(300);
        let mut key = leaf;
        let revision = 4;
        while let Parent::Log(parent, _) = key.parent(revision) {
            assert!(key < parent, "{:?} must precede {:?}", key, parent);
            key = parent;
        }
        assert_eq!(key, LogKey::new(TrieSpace::Revision, 0, 0));
    }

    #[test]
    fn test_name_page_sorts_first() {
        assert!(LogKey::name() < LogKey::data(0));
        assert!(LogKey::name() < LogKey::revision_root(0));
        assert_eq!(LogKey::name().kind(), PageKind::Name);
    }

    #[test]
    fn test_parent_slots() {
        assert_eq!(
            LogKey::data(130).parent(2),
            Parent::Log(LogKey::new(TrieSpace::Record, 4, 1), 2)
        );
        assert_eq!(
            LogKey::new(TrieSpace::Record, 0, 0).parent(2),
            Parent::Log(LogKey::revision_root(2), RECORD_ROOT_SLOT)
        );
        assert_eq!(
            LogKey::revision_root(129).parent(129),
            Parent::Log(LogKey::new(TrieSpace::Revision, 4, 1), 1)
        );
        assert_eq!(
            LogKey::new(TrieSpace::Revision, 0, 0).parent(7),
            Parent::Uber(REVISION_ROOT_SLOT)
        );
        assert_eq!(
            LogKey::name().parent(7),
            Parent::Log(LogKey::revision_root(7), NAME_SLOT)
        );
    }

    #[test]
    fn test_kinds() {
        assert_eq!(LogKey::data(0).kind(), PageKind::Data);
        assert_eq!(LogKey::revision_root(0).kind(), PageKind::RevisionRoot);
        assert_eq!(LogKey::new(TrieSpace::Record, 2, 0).kind(), PageKind::Indirect);
    }

    #[test]
    fn test_read_write() {
        let key = LogKey::new(TrieSpace::Revision, 3, 0xDEAD_BEEF);
        let mut buf = [0u8; LOG_KEY_SIZE];
        key.write(&mut buf);
        assert_eq!(LogKey::read(&buf), Some(key));

        buf[0] = 7;
        assert_eq!(LogKey::read(&buf), None);
    }
}
