//! NameTable - Key to string dictionary stored in a revision's name page.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Sorted key to name map.
///
/// Iteration order is by key, which keeps the serialized form deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameTable {
    names: BTreeMap<i32, Arc<str>>,
}

impl NameTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the name stored under `key`.
    pub fn get(&self, key: i32) -> Option<&str> {
        self.names.get(&key).map(|s| &**s)
    }

    /// Inserts or replaces a name.
    pub fn insert(&mut self, key: i32, name: &str) -> Option<Arc<str>> {
        self.names.insert(key, Arc::from(name))
    }

    /// Removes a name.
    pub fn remove(&mut self, key: i32) -> Option<Arc<str>> {
        self.names.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterates in key order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &str)> {
        self.names.iter().map(|(k, v)| (*k, &**v))
    }
}

impl FromIterator<(i32, String)> for NameTable {
    fn from_iter<I: IntoIterator<Item = (i32, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(|(k, v)| (k, Arc::from(v))).collect(),
        }
    }
}
