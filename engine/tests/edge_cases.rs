//! Edge case tests for mirror-engine
//!
//! These tests cover boundary conditions of resolution, diffing and
//! ordered-collection reconciliation.

use mirror_engine::{
    apply_all, resolve, to_props, Binding, BindingRegistry, BindingUpdate, ChildChange, Entry,
    MirrorAction, MirrorState, OrderedCollection, PathSpec, QueryDescriptor, StoreEntry,
    SubscriptionPlan,
};
use serde_json::{json, Value};

#[derive(Default)]
struct App {
    counter: i64,
    room: Option<String>,
}

fn added(key: &str, value: Value, previous: Option<&str>) -> ChildChange {
    ChildChange::Added {
        key: key.to_string(),
        value,
        previous_key: previous.map(String::from),
    }
}

fn moved(key: &str, previous: Option<&str>) -> ChildChange {
    ChildChange::Moved {
        key: key.to_string(),
        previous_key: previous.map(String::from),
    }
}

// ============================================================================
// Ordered collection
// ============================================================================

#[test]
fn insert_move_update_remove_scenario() {
    let mut list = OrderedCollection::new();
    apply_all(
        &mut list,
        vec![
            added("k1", json!("v1"), None),
            added("k2", json!("v2"), Some("k1")),
            added("k3", json!("v3"), Some("k1")),
        ],
    );
    assert_eq!(list.keys(), vec!["k1", "k3", "k2"]);

    moved("k2", None).apply(&mut list);
    assert_eq!(list.keys(), vec!["k2", "k1", "k3"]);

    ChildChange::Changed {
        key: "k2".into(),
        value: json!("v2'"),
    }
    .apply(&mut list);
    assert_eq!(list.keys(), vec!["k2", "k1", "k3"]);
    assert_eq!(list.get("k2"), Some(&json!("v2'")));
    assert_eq!(list.get("k1"), Some(&json!("v1")));

    ChildChange::Removed { key: "k1".into() }.apply(&mut list);
    assert_eq!(list.keys(), vec!["k2", "k3"]);

    assert!(!ChildChange::Removed { key: "k1".into() }.apply(&mut list));
    assert_eq!(list.keys(), vec!["k2", "k3"]);
}

#[test]
fn update_on_absent_key_is_idempotent() {
    let mut list = OrderedCollection::new();
    list.insert("a", json!(1), None);
    for _ in 0..3 {
        assert!(!ChildChange::Changed {
            key: "ghost".into(),
            value: json!(9),
        }
        .apply(&mut list));
    }
    assert_eq!(list.len(), 1);
    assert_eq!(list.get("a"), Some(&json!(1)));
}

#[test]
fn empty_collection_operations() {
    let mut list = OrderedCollection::new();
    assert!(!list.remove("a"));
    assert!(!list.move_after("a", None));
    assert!(!list.update("a", json!(1)));
    assert!(list.is_empty());
    assert!(list.insert("a", json!(1), None));
}

#[test]
fn tail_append_by_chaining_previous_keys() {
    let mut list = OrderedCollection::new();
    let mut previous: Option<String> = None;
    for i in 0..100 {
        let key = format!("k{:03}", i);
        list.insert(key.clone(), json!(i), previous.as_deref());
        previous = Some(key);
    }
    assert_eq!(list.len(), 100);
    assert_eq!(list.keys().first().copied(), Some("k000"));
    assert_eq!(list.keys().last().copied(), Some("k099"));
}

#[test]
fn unicode_and_odd_keys() {
    let mut list = OrderedCollection::new();
    let keys = ["日本語", "-Mabc123", "with space", "🎉", ""];
    let mut previous: Option<&str> = None;
    for key in keys {
        assert!(list.insert(key, json!(key), previous));
        previous = Some(key);
    }
    assert_eq!(list.keys(), keys.to_vec());
    assert!(list.move_after("", None));
    assert_eq!(list.keys()[0], "");
}

#[test]
fn large_nested_values_compare_deeply() {
    let mut list = OrderedCollection::new();
    let nested = json!({"a": {"b": {"c": [1, 2, {"d": "x".repeat(4096)}]}}});
    list.insert("deep", nested.clone(), None);
    assert!(!list.update("deep", nested.clone()));

    let mut changed = nested;
    changed["a"]["b"]["c"][2]["d"] = json!("y");
    assert!(list.update("deep", changed));
}

// ============================================================================
// Resubscription round trip
// ============================================================================

#[test]
fn resubscribe_replay_reproduces_state() {
    let remote_events = vec![
        added("a", json!(1), None),
        added("b", json!(2), Some("a")),
        added("c", json!(3), Some("b")),
        moved("c", None),
        ChildChange::Changed {
            key: "a".into(),
            value: json!(10),
        },
    ];

    let mut state = MirrorState::new(["items"]);
    let open = |state: &mut MirrorState| {
        state.apply(MirrorAction::ArrayUpdated {
            binding: "items".into(),
            key: "items".into(),
            items: vec![],
        });
    };

    open(&mut state);
    for change in remote_events.clone() {
        state.apply(MirrorAction::from_child_change("items", change));
    }
    let first = state.store("items").cloned();

    // close: slot reset to null
    state.apply(MirrorAction::ValueReplaced {
        binding: "items".into(),
        entry: None,
    });
    assert_eq!(state.store("items"), None);

    open(&mut state);
    for change in remote_events {
        state.apply(MirrorAction::from_child_change("items", change));
    }
    assert_eq!(state.store("items").cloned(), first);
    assert_eq!(
        state.list("items").unwrap().keys(),
        vec!["c", "a", "b"]
    );
}

// ============================================================================
// Resolution and diffing
// ============================================================================

fn app_registry() -> BindingRegistry<App> {
    BindingRegistry::new()
        .with_binding(Binding::new("count", "counter"))
        .unwrap()
        .with_binding(Binding::array(
            "messages",
            PathSpec::computed(|app: &App| app.room.as_ref().map(|r| format!("rooms/{}/messages", r))),
        ))
        .unwrap()
}

#[test]
fn unrelated_state_changes_produce_no_actions() {
    let registry = app_registry();
    let mut app = App::default();
    let before = resolve(&registry, &app);
    for i in 0..10 {
        app.counter = i;
        let next = resolve(&registry, &app);
        assert_eq!(SubscriptionPlan::diff(&before, &next).action_count(), 0);
    }
}

#[test]
fn path_function_cycle() {
    let registry = app_registry();
    let lobby = App {
        room: Some("lobby".into()),
        ..Default::default()
    };
    let nowhere = App::default();
    let games = App {
        room: Some("games".into()),
        ..Default::default()
    };

    let a = resolve(&registry, &lobby);
    let b = resolve(&registry, &nowhere);
    let c = resolve(&registry, &games);

    assert_eq!(SubscriptionPlan::diff(&a, &b).unsubscribe, vec!["messages"]);
    assert_eq!(SubscriptionPlan::diff(&b, &c).subscribe, vec!["messages"]);
    assert_eq!(SubscriptionPlan::diff(&a, &c).resubscribe, vec!["messages"]);
}

#[test]
fn query_change_forces_resubscribe() {
    let mut registry = app_registry();
    let app = App::default();
    let before = resolve(&registry, &app);

    registry
        .update(BindingUpdate::new("count").query(Some(QueryDescriptor::new().limit_to_first(1))))
        .unwrap();
    let plan = SubscriptionPlan::diff(&before, &resolve(&registry, &app));
    assert_eq!(plan.resubscribe, vec!["count"]);
    assert!(plan.subscribe.is_empty());
    assert!(plan.unsubscribe.is_empty());
}

#[test]
fn computed_path_with_leading_slash_normalizes() {
    let registry = BindingRegistry::new()
        .with_binding(Binding::new(
            "x",
            PathSpec::computed(|_: &App| Some("/a/b/".to_string())),
        ))
        .unwrap();
    let options = resolve(&registry, &App::default());
    assert_eq!(options["x"].path.as_deref(), Some("a/b"));
}

// ============================================================================
// Projection
// ============================================================================

#[test]
fn counter_scenario_projection() {
    let mut state = MirrorState::new(["count"]);
    state.apply(MirrorAction::ValueReplaced {
        binding: "count".into(),
        entry: Some(Entry::new("counter", json!(5))),
    });
    let props = to_props(&state, ["count"]);
    assert_eq!(props["count"], json!({"key": "counter", "value": 5}));

    state.apply(MirrorAction::ValueReplaced {
        binding: "count".into(),
        entry: None,
    });
    let props = to_props(&state, ["count"]);
    assert_eq!(props["count"], Value::Null);
}

#[test]
fn snapshot_serialization_roundtrip() {
    let mut state = MirrorState::new(["posts", "count", "pairs"]);
    state.apply(MirrorAction::ArrayUpdated {
        binding: "posts".into(),
        key: "posts".into(),
        items: vec![Entry::new("b", json!({"n": 2})), Entry::new("a", json!({"n": 1}))],
    });
    state.apply(MirrorAction::ValueReplaced {
        binding: "count".into(),
        entry: Some(Entry::new("counter", json!(3))),
    });

    state.apply(MirrorAction::ValueReplaced {
        binding: "pairs".into(),
        entry: Some(Entry::new("pairs", json!([{"key": "x", "value": 1}]))),
    });

    let json = serde_json::to_string(&state).unwrap();
    let restored: MirrorState = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, state);
    assert!(matches!(restored.store("posts"), Some(StoreEntry::List { .. })));
    assert!(matches!(restored.store("pairs"), Some(StoreEntry::Value(_))));
    assert_eq!(restored.list("posts").unwrap().keys(), vec!["b", "a"]);
}
