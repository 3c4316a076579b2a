//! RecordSlots - Fixed-size slot array held by a data page.
//!
//! Each data page owns `PAGE_RECORD_COUNT` slots indexed by
//! `key & (PAGE_RECORD_COUNT - 1)`. An empty slot is either a never-used
//! position or a removed record.
//!
//! Records are immutable shared byte strings, so cloning a slot array for a
//! copy-on-write page only bumps reference counts.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::trie_path::PAGE_RECORD_COUNT;

/// An immutable record payload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Record(Arc<[u8]>);

impl Record {
    /// Creates a record from raw bytes.
    pub fn new(bytes: &[u8]) -> Self {
        Record(Arc::from(bytes))
    }

    /// Returns the record bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true if both records share the same allocation.
    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Record {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Record {
    fn from(bytes: Vec<u8>) -> Self {
        Record(Arc::from(bytes))
    }
}

impl From<&[u8]> for Record {
    fn from(bytes: &[u8]) -> Self {
        Record::new(bytes)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record({} bytes)", self.0.len())
    }
}

/// Slot array of a data page.
#[derive(Clone, PartialEq, Eq)]
pub struct RecordSlots {
    slots: Box<[Option<Record>]>,
}

impl RecordSlots {
    /// Creates an array with every slot empty.
    pub fn new() -> Self {
        Self {
            slots: vec![None; PAGE_RECORD_COUNT].into_boxed_slice(),
        }
    }

    /// Returns the record at `slot`.
    pub fn get(&self, slot: usize) -> Option<&Record> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Stores a record, returning the previous occupant.
    ///
    /// # Panics
    /// Panics if `slot >= PAGE_RECORD_COUNT`.
    pub fn set(&mut self, slot: usize, record: Record) -> Option<Record> {
        self.slots[slot].replace(record)
    }

    /// Empties a slot, returning the removed record.
    pub fn remove(&mut self, slot: usize) -> Option<Record> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Returns true if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Iterates over occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Record)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|r| (i, r)))
    }
}

impl Default for RecordSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecordSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let mut slots = RecordSlots::new();
        assert!(slots.is_empty());

        assert!(slots.set(5, Record::new(b"five")).is_none());
        assert_eq!(slots.get(5).unwrap().as_bytes(), b"five");
        assert_eq!(slots.len(), 1);

        let old = slots.set(5, Record::new(b"FIVE")).unwrap();
        assert_eq!(old.as_bytes(), b"five");

        assert!(slots.remove(5).is_some());
        assert!(slots.get(5).is_none());
        assert!(slots.remove(5).is_none());
    }

    #[test]
    fn test_clone_shares_records() {
        let mut slots = RecordSlots::new();
        slots.set(0, Record::new(&[7u8; 512]));

        let copy = slots.clone();
        assert!(copy.get(0).unwrap().ptr_eq(slots.get(0).unwrap()));
    }

    #[test]
    fn test_out_of_range_slot_reads_empty() {
        let slots = RecordSlots::new();
        assert!(slots.get(PAGE_RECORD_COUNT).is_none());
    }
}
