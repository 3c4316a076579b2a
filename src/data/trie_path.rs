//! TriePath - Address decomposition for the fixed-fanout page trie.
//!
//! A sequence number (a revision number or a record page number) is split
//! into `LEVELS` groups of `FANOUT_BITS` bits, most-significant group first.
//! Group `i` selects the reference slot in the indirect page at level `i`.
//!
//! ## Levels
//!
//! Level 0 is the indirect page directly below the space root (the
//! RevisionRoot for record space, the Uber page for revision space).
//! Level `LEVELS` is the leaf. The page at level `l` on the path of `S` is
//! identified by the prefix `S >> (FANOUT_BITS * (LEVELS - l))`.

/// Bits consumed per trie level.
pub const FANOUT_BITS: u32 = 7;

/// Number of reference slots in an indirect page.
pub const FANOUT: usize = 1 << FANOUT_BITS;

/// Number of indirect levels between a space root and its leaves.
pub const LEVELS: usize = 5;

/// Record slots per data page.
pub const PAGE_RECORD_COUNT: usize = 128;

/// Bits of a record key consumed by the in-page slot.
pub const RECORD_SLOT_BITS: u32 = PAGE_RECORD_COUNT.trailing_zeros();

/// Exclusive upper bound for sequence numbers addressable by the trie.
pub const MAX_SEQUENCE: u64 = 1 << (FANOUT_BITS * LEVELS as u32);

const SLOT_MASK: u64 = (FANOUT as u64) - 1;

/// Path of a leaf through the indirect levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TriePath {
    seq: u64,
}

impl TriePath {
    /// Creates the path for a leaf sequence number.
    ///
    /// Returns `None` when the number lies outside the addressable range.
    #[inline]
    pub fn for_page(seq: u64) -> Option<Self> {
        (seq < MAX_SEQUENCE).then_some(Self { seq })
    }

    /// Splits a record key into its data page path and in-page slot.
    #[inline]
    pub fn for_record(key: u64) -> Option<(Self, usize)> {
        let slot = (key & (PAGE_RECORD_COUNT as u64 - 1)) as usize;
        Self::for_page(key >> RECORD_SLOT_BITS).map(|path| (path, slot))
    }

    /// Returns the leaf sequence number.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns the slot selected in the indirect page at `level`.
    ///
    /// # Panics
    /// Panics if `level >= LEVELS`.
    #[inline]
    pub fn offset(&self, level: usize) -> usize {
        assert!(level < LEVELS, "indirect level out of bounds");
        let shift = FANOUT_BITS * (LEVELS - 1 - level) as u32;
        ((self.seq >> shift) & SLOT_MASK) as usize
    }

    /// Returns the prefix identifying the page at `level` on this path.
    ///
    /// `prefix(LEVELS)` is the leaf sequence number itself.
    #[inline]
    pub fn prefix(&self, level: usize) -> u64 {
        assert!(level <= LEVELS, "trie level out of bounds");
        self.seq >> (FANOUT_BITS * (LEVELS - level) as u32)
    }

    /// Iterates over the slot offsets from level 0 down to the last indirect level.
    pub fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        (0..LEVELS).map(move |level| self.offset(level))
    }
}

/// Returns the slot a page with prefix `seq` occupies in its parent.
#[inline]
pub fn slot_in_parent(seq: u64) -> usize {
    (seq & SLOT_MASK) as usize
}

/// Returns the prefix of the parent of the page with prefix `seq`.
#[inline]
pub fn parent_prefix(seq: u64) -> u64 {
    seq >> FANOUT_BITS
}
