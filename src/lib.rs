//! # revtrie
//!
//! A revisioned Copy-on-Write page store.
//!
//! ## Architecture
//!
//! Every revision is an immutable tree of pages rooted in an Uber page:
//!
//! 1. **Revision space** - a fixed-fanout trie below the Uber page that
//!    indexes the RevisionRoot of every revision ever committed
//! 2. **Record space** - a fixed-fanout trie below each RevisionRoot whose
//!    leaves are data pages of 128 record slots, plus one name page
//!
//! A write transaction clones only the pages on the paths it touches and
//! stages them in a bounded transaction log. Its commit writes them bottom-up,
//! hashing every page into its parent reference, and publishes the new Uber
//! page. Readers pinned to an older Uber page are never disturbed.
//!
//! ## Modules
//!
//! - `data` - Addressing, records and names
//! - `store` - Pages, backends, transactions and the [`Storage`] entry point
//! - `log` - Transaction log with LRU cache and overflow spilling
//! - `commit` - Commit coordinator and its blocking/non-blocking strategies
//! - `merkle` - Keccak-256 integrity hashes and tree verification

pub mod commit;
pub mod data;
pub mod log;
pub mod merkle;
pub mod store;

pub use commit::{CommitHandle, CommitInfo, CommitStrategy, StorageConfig};
pub use store::{DbError, ReadTransaction, Result, Storage, WriteTransaction};
