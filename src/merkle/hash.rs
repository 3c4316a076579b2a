//! Keccak-256 content hashing for pages.

use tiny_keccak::{Hasher, Keccak};

use crate::store::{page_codec, Page, Result};

/// Size of an integrity hash in bytes.
pub const HASH_SIZE: usize = 32;

/// An integrity hash.
pub type Hash = [u8; HASH_SIZE];

/// Computes Keccak-256 hash of data.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; HASH_SIZE];
    hasher.finalize(&mut hash);
    hash
}

/// Hashes the serialized form of a page.
///
/// The serialized form embeds the keys and hashes of every child reference,
/// so the hash of a page covers its whole subtree.
pub fn page_hash(page: &Page) -> Result<Hash> {
    Ok(keccak256(&page_codec::encode(page)?))
}
