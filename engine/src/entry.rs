//! Mirrored entries.

use crate::{ChildKey, OrderedCollection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A keyed value. The key is the last segment of the remote location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: ChildKey,
    pub value: Value,
}

impl Entry {
    pub fn new(key: impl Into<ChildKey>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// The canonical local value of one binding.
///
/// Serialized with a `kind` tag so a scalar holding an array of `{key,
/// value}` objects reads back as a scalar. Consumers see the untagged shape
/// from [`StoreEntry::to_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreEntry {
    /// Array bindings: children in remote sibling order
    List { key: ChildKey, value: OrderedCollection },
    /// Scalar and object bindings: the whole value
    Value(Entry),
}

impl StoreEntry {
    /// Create an empty list entry.
    pub fn empty_list(key: impl Into<ChildKey>) -> Self {
        StoreEntry::List {
            key: key.into(),
            value: OrderedCollection::new(),
        }
    }

    /// Key of the mirrored location.
    pub fn key(&self) -> &str {
        match self {
            StoreEntry::Value(entry) => &entry.key,
            StoreEntry::List { key, .. } => key,
        }
    }

    /// The ordered children, for list entries.
    pub fn as_list(&self) -> Option<&OrderedCollection> {
        match self {
            StoreEntry::List { value, .. } => Some(value),
            StoreEntry::Value(_) => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut OrderedCollection> {
        match self {
            StoreEntry::List { value, .. } => Some(value),
            StoreEntry::Value(_) => None,
        }
    }

    /// `{key, value}`, with list children as `[{key, value}, ..]`.
    pub fn to_json(&self) -> Value {
        match self {
            StoreEntry::Value(entry) => json!({"key": entry.key, "value": entry.value}),
            StoreEntry::List { key, value } => {
                let children: Vec<Value> = value
                    .iter()
                    .map(|child| json!({"key": child.key, "value": child.value}))
                    .collect();
                json!({"key": key, "value": children})
            }
        }
    }

    /// The whole value, for scalar and object entries.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            StoreEntry::Value(entry) => Some(&entry.value),
            StoreEntry::List { .. } => None,
        }
    }
}

impl From<Entry> for StoreEntry {
    fn from(entry: Entry) -> Self {
        StoreEntry::Value(entry)
    }
}
