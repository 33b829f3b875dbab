//! Ordered collection of keyed children.
//!
//! Order is defined by the remote store through sibling keys ("insert after
//! key X"), never by sorting locally. Every mutation positions an entry
//! relative to an existing sibling or at the head.
//!
//! Lookups are linear scans. Mirrored collections are per-screen datasets,
//! small enough that an auxiliary index would cost more than it saves.

use crate::{ChildKey, Entry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Children of one array binding, in remote order, at most one per key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedCollection {
    entries: Vec<Entry>,
}

impl OrderedCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Position of a key.
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    /// Get a child's value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index_of(key).is_some()
    }

    /// Index right after `previous`, or 0 for the head.
    fn insertion_index(&self, previous: Option<&str>) -> Option<usize> {
        match previous {
            None => Some(0),
            Some(prev) => self.index_of(prev).map(|i| i + 1),
        }
    }

    /// Insert a child right after `previous` (`None` = head).
    ///
    /// An unknown `previous` key is a no-op. A key that is already present
    /// is repositioned and takes the new value.
    pub fn insert(&mut self, key: impl Into<ChildKey>, value: Value, previous: Option<&str>) -> bool {
        let key = key.into();

        if self.contains(&key) {
            if previous == Some(key.as_str()) {
                return self.update(&key, value);
            }
            if previous.is_some_and(|prev| !self.contains(prev)) {
                return false;
            }
            self.remove(&key);
        }

        let Some(index) = self.insertion_index(previous) else {
            tracing::trace!(key = %key, previous = ?previous, "Insert after unknown sibling ignored");
            return false;
        };
        self.entries.insert(index, Entry { key, value });
        true
    }

    /// Replace a child's value in place.
    ///
    /// Absent keys and deep-equal values are no-ops. Position never changes.
    pub fn update(&mut self, key: &str, value: Value) -> bool {
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) if entry.value != value => {
                entry.value = value;
                true
            }
            Some(_) => false,
            None => {
                tracing::trace!(key = %key, "Update of unknown child ignored");
                false
            }
        }
    }

    /// Move a child right after `previous` (`None` = head).
    ///
    /// The collection is left untouched unless both the key and the target
    /// sibling exist.
    pub fn move_after(&mut self, key: &str, previous: Option<&str>) -> bool {
        if previous == Some(key) {
            return false;
        }
        let Some(current) = self.index_of(key) else {
            tracing::trace!(key = %key, "Move of unknown child ignored");
            return false;
        };
        if previous.is_some_and(|prev| !self.contains(prev)) {
            tracing::trace!(key = %key, previous = ?previous, "Move after unknown sibling ignored");
            return false;
        }

        let entry = self.entries.remove(current);
        let index = self.insertion_index(previous).unwrap_or(0);
        self.entries.insert(index, entry);
        index != current
    }

    /// Remove a child. Absent keys are a no-op.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.index_of(key) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Keys in order.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    /// Entries in order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Entry> for OrderedCollection {
    /// Collect entries, keeping the first occurrence of each key.
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        let mut collection = OrderedCollection::new();
        for entry in iter {
            if !collection.contains(&entry.key) {
                collection.entries.push(entry);
            }
        }
        collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn abc() -> OrderedCollection {
        let mut list = OrderedCollection::new();
        list.insert("k1", json!(1), None);
        list.insert("k2", json!(2), Some("k1"));
        list.insert("k3", json!(3), Some("k1"));
        list
    }

    #[test]
    fn insert_after_sibling() {
        assert_eq!(abc().keys(), vec!["k1", "k3", "k2"]);
    }

    #[test]
    fn insert_null_previous_goes_to_head() {
        let mut list = abc();
        assert!(list.insert("k0", json!(0), None));
        assert_eq!(list.keys(), vec!["k0", "k1", "k3", "k2"]);
    }

    #[test]
    fn insert_after_unknown_sibling_is_noop() {
        let mut list = abc();
        assert!(!list.insert("k9", json!(9), Some("missing")));
        assert_eq!(list.keys(), vec!["k1", "k3", "k2"]);
    }

    #[test]
    fn insert_existing_key_repositions() {
        let mut list = abc();
        assert!(list.insert("k1", json!(10), Some("k2")));
        assert_eq!(list.keys(), vec!["k3", "k2", "k1"]);
        assert_eq!(list.get("k1"), Some(&json!(10)));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn move_to_head_then_update_keeps_order() {
        let mut list = abc();
        assert!(list.move_after("k2", None));
        assert_eq!(list.keys(), vec!["k2", "k1", "k3"]);

        assert!(list.update("k2", json!({"title": "edited"})));
        assert_eq!(list.keys(), vec!["k2", "k1", "k3"]);
        assert_eq!(list.get("k2"), Some(&json!({"title": "edited"})));
        assert_eq!(list.get("k1"), Some(&json!(1)));
    }

    #[test]
    fn move_after_sibling() {
        let mut list = abc();
        assert!(list.move_after("k1", Some("k2")));
        assert_eq!(list.keys(), vec!["k3", "k2", "k1"]);
    }

    #[test]
    fn move_to_same_position_reports_unchanged() {
        let mut list = abc();
        assert!(!list.move_after("k3", Some("k1")));
        assert_eq!(list.keys(), vec!["k1", "k3", "k2"]);
    }

    #[test]
    fn move_unknown_is_noop() {
        let mut list = abc();
        assert!(!list.move_after("missing", None));
        assert!(!list.move_after("k1", Some("missing")));
        assert!(!list.move_after("k1", Some("k1")));
        assert_eq!(list.keys(), vec!["k1", "k3", "k2"]);
    }

    #[test]
    fn remove_by_key() {
        let mut list = abc();
        list.move_after("k2", None);
        assert!(list.remove("k1"));
        assert_eq!(list.keys(), vec!["k2", "k3"]);
        assert!(!list.remove("k1"));
        assert_eq!(list.keys(), vec!["k2", "k3"]);
    }

    #[test]
    fn update_absent_or_equal_is_noop() {
        let mut list = abc();
        assert!(!list.update("missing", json!(1)));
        assert!(!list.update("k1", json!(1)));
        assert_eq!(list, abc());
    }

    #[test]
    fn from_iter_dedups_keys() {
        let list: OrderedCollection = vec![
            Entry::new("a", json!(1)),
            Entry::new("b", json!(2)),
            Entry::new("a", json!(3)),
        ]
        .into_iter()
        .collect();
        assert_eq!(list.keys(), vec!["a", "b"]);
        assert_eq!(list.get("a"), Some(&json!(1)));
    }
}
