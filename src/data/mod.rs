//! Addressing primitives and leaf payloads for the page trie.

mod name_table;
mod record_slots;
mod trie_path;


pub use name_table::NameTable;
pub use record_slots::{Record, RecordSlots};
pub use trie_path::{
    parent_prefix, slot_in_parent, TriePath, FANOUT, FANOUT_BITS, LEVELS, MAX_SEQUENCE,
    PAGE_RECORD_COUNT, RECORD_SLOT_BITS,
};
