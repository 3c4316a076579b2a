//! Transaction log - Staging of pages modified by an open write transaction.
//!
//! Pages are addressed logically by [`LogKey`] until commit assigns them
//! storage keys. The log keeps a bounded number of entries in memory and
//! spills the rest to a per-transaction overflow file.

mod log_key;
mod log_value;
mod overflow;
mod transaction_log;

pub use log_key::{LogKey, Parent, TrieSpace, LOG_KEY_SIZE, NAME_LEVEL};
pub use log_value::LogValue;
pub use overflow::{OverflowIter, OverflowStore, SealedLog};
pub use transaction_log::TransactionLog;
