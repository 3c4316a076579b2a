//! Storage key representation.
//!
//! A StorageKey is the 64-bit handle a backend hands out for a written page.

use std::fmt;

/// Identifies a persisted page inside a backend.
///
/// Keys are opaque to the engine. Key 0 is reserved as the null key and is
/// never returned by a backend.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StorageKey(u64);

impl StorageKey {
    /// The null key.
    pub const NULL: StorageKey = StorageKey(0);

    /// Size of the key in bytes.
    pub const SIZE: usize = std::mem::size_of::<u64>();

    /// Creates a key from its raw value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        StorageKey(raw)
    }

    /// Returns the raw value.
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Returns true if this is the null key.
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Reads a key from a byte slice (little-endian).
    pub fn read(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE);
        let mut raw = [0u8; Self::SIZE];
        raw.copy_from_slice(&data[..Self::SIZE]);
        StorageKey(u64::from_le_bytes(raw))
    }

    /// Writes the key to a byte slice (little-endian).
    pub fn write(&self, dest: &mut [u8]) {
        assert!(dest.len() >= Self::SIZE);
        dest[..Self::SIZE].copy_from_slice(&self.0.to_le_bytes());
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "StorageKey(null)")
        } else {
            write!(f, "StorageKey({})", self.0)
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "key @{}", self.0)
        }
    }
}
