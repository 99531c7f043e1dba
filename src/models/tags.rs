//! Resource tags with case-insensitive keys.
//!
//! Azure treats tag names as case-insensitive: `Owner`, `owner` and `OWNER`
//! address the same tag. [`TagMap`] keeps the key as it was written (so it can
//! be echoed back on update) but indexes entries by a folded key, so lookups
//! never depend on the caller guessing the stored casing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Fold a tag key for case-insensitive comparison.
fn fold(key: &str) -> String {
    key.to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagEntry {
    key: String,
    value: String,
}

/// Tag set of a resource, keyed case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "Option<HashMap<String, String>>",
    into = "BTreeMap<String, String>"
)]
pub struct TagMap {
    entries: HashMap<String, TagEntry>,
}

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a tag value by key, ignoring case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&fold(key)).map(|e| e.value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&fold(key))
    }

    /// Insert or replace a tag. An existing entry under a differently-cased
    /// key keeps its original spelling.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.get_mut(&fold(&key)) {
            Some(entry) => Some(std::mem::replace(&mut entry.value, value)),
            None => {
                self.entries.insert(fold(&key), TagEntry { key, value });
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(&fold(key)).map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(key, value)` pairs with keys in their stored casing.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|e| (e.key.as_str(), e.value.as_str()))
    }

    /// Apply a staged patch in place, mirroring what the update call does
    /// server-side.
    pub fn apply(&mut self, patch: &TagPatch) {
        for (key, value) in &patch.merge {
            self.insert(key.clone(), value.clone());
        }
        for key in &patch.remove {
            self.remove(key);
        }
    }
}

impl From<Option<HashMap<String, String>>> for TagMap {
    fn from(tags: Option<HashMap<String, String>>) -> Self {
        tags.into_iter().flatten().collect()
    }
}

impl From<TagMap> for BTreeMap<String, String> {
    fn from(tags: TagMap) -> Self {
        tags.entries
            .into_values()
            .map(|e| (e.key, e.value))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = TagMap::new();
        for (key, value) in iter {
            tags.insert(key, value);
        }
        tags
    }
}

/// Tag writes staged for a single resource group.
///
/// Everything staged for one group goes out in one update call; an empty patch
/// means no call at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagPatch {
    /// Tags to create or overwrite.
    pub merge: BTreeMap<String, String>,
    /// Tags to delete.
    pub remove: BTreeSet<String>,
}

impl TagPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.merge.insert(key.into(), value.into());
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.remove.insert(key.into());
        self
    }

    /// Fold another patch into this one. Entries from `other` win.
    pub fn extend(&mut self, other: TagPatch) {
        self.merge.extend(other.merge);
        self.remove.extend(other.remove);
    }

    pub fn is_empty(&self) -> bool {
        self.merge.is_empty() && self.remove.is_empty()
    }
}
