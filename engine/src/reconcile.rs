//! Sibling-relative change events applied to an ordered collection.
//!
//! The remote store describes every change to an ordered location as one of
//! four events. Replaying them in delivery order reproduces the remote
//! order exactly, without ever refetching the collection:
//!
//! - `Added` inserts after the previous sibling (or at the head)
//! - `Changed` replaces a value in place
//! - `Moved` repositions after the previous sibling (or at the head)
//! - `Removed` drops the key
//!
//! Events that reference a key the collection does not hold are benign
//! no-ops: they belong to a subscription that has just been replaced.

use crate::{ChildKey, OrderedCollection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One sibling-relative change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChildChange {
    #[serde(rename_all = "camelCase")]
    Added {
        key: ChildKey,
        value: Value,
        previous_key: Option<ChildKey>,
    },
    Changed { key: ChildKey, value: Value },
    #[serde(rename_all = "camelCase")]
    Moved {
        key: ChildKey,
        previous_key: Option<ChildKey>,
    },
    Removed { key: ChildKey },
}

impl ChildChange {
    /// The child this change targets.
    pub fn key(&self) -> &str {
        match self {
            ChildChange::Added { key, .. }
            | ChildChange::Changed { key, .. }
            | ChildChange::Moved { key, .. }
            | ChildChange::Removed { key } => key,
        }
    }

    /// Apply to a collection. Returns whether the collection changed.
    pub fn apply(self, collection: &mut OrderedCollection) -> bool {
        match self {
            ChildChange::Added {
                key,
                value,
                previous_key,
            } => collection.insert(key, value, previous_key.as_deref()),
            ChildChange::Changed { key, value } => collection.update(&key, value),
            ChildChange::Moved { key, previous_key } => {
                collection.move_after(&key, previous_key.as_deref())
            }
            ChildChange::Removed { key } => collection.remove(&key),
        }
    }
}

/// Apply a sequence of changes in order.
///
/// Returns the number of changes that altered the collection.
pub fn apply_all(
    collection: &mut OrderedCollection,
    changes: impl IntoIterator<Item = ChildChange>,
) -> usize {
    changes
        .into_iter()
        .map(|change| change.apply(collection))
        .filter(|changed| *changed)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn added(key: &str, value: Value, previous: Option<&str>) -> ChildChange {
        ChildChange::Added {
            key: key.into(),
            value,
            previous_key: previous.map(String::from),
        }
    }

    #[test]
    fn replay_sequence() {
        let mut list = OrderedCollection::new();
        let changes = vec![
            added("k1", json!("v1"), None),
            added("k2", json!("v2"), Some("k1")),
            added("k3", json!("v3"), Some("k1")),
            ChildChange::Moved {
                key: "k2".into(),
                previous_key: None,
            },
            ChildChange::Changed {
                key: "k2".into(),
                value: json!("v2'"),
            },
            ChildChange::Removed { key: "k1".into() },
        ];

        let applied = apply_all(&mut list, changes);
        assert_eq!(applied, 6);
        assert_eq!(list.keys(), vec!["k2", "k3"]);
        assert_eq!(list.get("k2"), Some(&json!("v2'")));
    }

    #[test]
    fn stale_events_are_noops() {
        let mut list = OrderedCollection::new();
        list.insert("k1", json!(1), None);

        let stale = vec![
            ChildChange::Changed {
                key: "gone".into(),
                value: json!(0),
            },
            ChildChange::Moved {
                key: "gone".into(),
                previous_key: None,
            },
            ChildChange::Removed { key: "gone".into() },
        ];
        assert_eq!(apply_all(&mut list, stale), 0);
        assert_eq!(list.keys(), vec!["k1"]);
    }

    #[test]
    fn serialization() {
        let change = added("k1", json!(1), None);
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(
            json,
            json!({"type": "added", "key": "k1", "value": 1, "previousKey": null})
        );
        assert_eq!(change.key(), "k1");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_change() -> impl Strategy<Value = ChildChange> {
            let key = prop::sample::select(vec!["a", "b", "c", "d", "e"]);
            let prev = prop::option::of(prop::sample::select(vec!["a", "b", "c", "d", "e"]));
            prop_oneof![
                (key.clone(), 0i64..5, prev.clone()).prop_map(|(k, v, p)| ChildChange::Added {
                    key: k.into(),
                    value: json!(v),
                    previous_key: p.map(String::from),
                }),
                (key.clone(), 0i64..5).prop_map(|(k, v)| ChildChange::Changed {
                    key: k.into(),
                    value: json!(v),
                }),
                (key.clone(), prev).prop_map(|(k, p)| ChildChange::Moved {
                    key: k.into(),
                    previous_key: p.map(String::from),
                }),
                key.prop_map(|k| ChildChange::Removed { key: k.into() }),
            ]
        }

        proptest! {
            #[test]
            fn prop_keys_stay_unique(changes in prop::collection::vec(arb_change(), 0..40)) {
                let mut list = OrderedCollection::new();
                apply_all(&mut list, changes);

                let mut keys = list.keys();
                let len = keys.len();
                keys.sort();
                keys.dedup();
                prop_assert_eq!(keys.len(), len);
            }

            #[test]
            fn prop_changed_never_reorders(
                setup in prop::collection::vec(arb_change(), 0..20),
                key in prop::sample::select(vec!["a", "b", "c", "d", "e"]),
                value in 0i64..100,
            ) {
                let mut list = OrderedCollection::new();
                apply_all(&mut list, setup);
                let before: Vec<String> = list.keys().into_iter().map(String::from).collect();

                ChildChange::Changed { key: key.into(), value: json!(value) }.apply(&mut list);
                let after: Vec<String> = list.keys().into_iter().map(String::from).collect();
                prop_assert_eq!(before, after);
            }

            #[test]
            fn prop_replay_is_deterministic(changes in prop::collection::vec(arb_change(), 0..40)) {
                let mut first = OrderedCollection::new();
                let mut second = OrderedCollection::new();
                apply_all(&mut first, changes.clone());
                apply_all(&mut second, changes);
                prop_assert_eq!(first, second);
            }
        }
    }
}
