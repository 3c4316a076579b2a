//! Integrity hashing.
//!
//! Every persisted reference stores the Keccak-256 hash of the encoded child
//! page. Because an encoded page embeds the hashes of its own children, the
//! hash of the Uber page commits to the whole revision history below it.

mod hash;
mod verify;


pub use hash::{keccak256, page_hash, Hash, HASH_SIZE};
pub use verify::{verify_page_tree, VerifyReport};
