//! Revisioned page storage.
//!
//! Every revision is a tree of immutable pages rooted in one Uber page.
//! Writers clone only the pages on the paths they touch (Copy-on-Write) and
//! publish a new Uber page; readers keep whatever Uber page they started on.

mod backend;
mod error;
mod file_backend;
mod metrics;
mod page;
pub mod page_codec;
mod page_reference;
mod read_trx;
mod storage;
mod storage_key;
mod trie;
mod write_trx;

#[cfg(test)]
mod tests;

use rustc_hash::FxBuildHasher;

pub use backend::{Backend, MemoryBackend};
pub use error::{DbError, Result};
pub use file_backend::FileBackend;
pub use metrics::{DbMetrics, MetricsSnapshot};
pub use page::{
    Page, PageKind, Payload, RevisionMeta, UberMeta, NAME_SLOT, RECORD_ROOT_SLOT,
    REVISION_ROOT_SLOT,
};
pub use page_reference::PageReference;
pub use read_trx::ReadTransaction;
pub use storage::Storage;
pub use storage_key::StorageKey;
pub use trie::{resolve, resolve_at, Snapshot};
pub use write_trx::{TransactionStats, WriteTransaction};

pub(crate) type FastHashMap<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;
pub(crate) type FastHashSet<K> = hashbrown::HashSet<K, FxBuildHasher>;
