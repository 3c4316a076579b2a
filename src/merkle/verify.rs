//! Bottom-up integrity verification of a persisted page tree.

use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxBuildHasher;
use tracing::debug;

use super::keccak256;
use crate::store::{page_codec, Backend, DbError, FastHashSet, Page, Result, StorageKey};

/// Outcome of a successful verification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Distinct pages read and checked below the root.
    pub pages_verified: usize,
}

/// Re-reads every page reachable from `root` and checks its Keccak-256 hash
/// against the one stored in the referencing slot.
///
/// Children are verified in parallel. Pages shared between revisions are
/// checked once.
pub fn verify_page_tree(backend: &dyn Backend, root: &Page) -> Result<VerifyReport> {
    let visited = Mutex::new(FastHashSet::with_hasher(FxBuildHasher));
    verify_children(backend, root, &visited)?;
    let pages_verified = visited.lock().len();
    debug!(pages = pages_verified, "merkle.verified");
    Ok(VerifyReport { pages_verified })
}

fn verify_children(
    backend: &dyn Backend,
    page: &Page,
    visited: &Mutex<FastHashSet<StorageKey>>,
) -> Result<()> {
    if page.has_staged_references() {
        return Err(DbError::inconsistent(format!(
            "persisted {:?} page references staged children",
            page.kind()
        )));
    }
    page.references()
        .par_iter()
        .filter_map(|reference| Some((reference.key()?, *reference.hash()?)))
        .try_for_each(|(key, expected)| {
            if !visited.lock().insert(key) {
                return Ok(());
            }
            let bytes = backend.read_bytes(key)?;
            if keccak256(&bytes) != expected {
                return Err(DbError::HashMismatch { key });
            }
            let child = page_codec::decode(&bytes)?;
            verify_children(backend, &child, visited)
        })
}
