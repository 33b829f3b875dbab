//! Projection of the mirror into consumer-facing props.
//!
//! Consumers ask for a list of binding names and get a JSON object with one
//! field per name: `{key, value}` for scalar and object bindings, `{key,
//! value: [{key, value}, ..]}` for array bindings, `null` for unresolved
//! ones. The reserved `_status` name maps to the session status.

use crate::{
    AuthUser, ErrorSlots, FlagSlots, MirrorState, StoreEntry, WriteTracker, STATUS_BINDING,
};
use serde::Serialize;
use serde_json::{Map, Value};

/// Session status exposed under `_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView<'a> {
    pub authenticated_user: Option<&'a AuthUser>,
    pub connected: bool,
    pub initial_fetch_done: bool,
    pub name: Option<&'a str>,
    pub errors: &'a ErrorSlots,
    pub processing: &'a FlagSlots,
    pub completed: &'a FlagSlots,
    pub writes: &'a WriteTracker,
}

impl<'a> StatusView<'a> {
    pub fn of(state: &'a MirrorState) -> Self {
        Self {
            authenticated_user: state.authenticated_user.as_ref(),
            connected: state.connected,
            initial_fetch_done: state.initial_fetch_done,
            name: state.name.as_deref(),
            errors: &state.errors,
            processing: &state.processing,
            completed: &state.completed,
            writes: &state.writes,
        }
    }
}

/// Project one binding (or `_status`) to JSON.
pub fn project(state: &MirrorState, name: &str) -> Value {
    if name == STATUS_BINDING {
        return serde_json::to_value(StatusView::of(state)).unwrap_or(Value::Null);
    }
    state.store(name).map(StoreEntry::to_json).unwrap_or(Value::Null)
}

/// Project a set of bindings to a props object.
pub fn to_props<'a>(state: &MirrorState, names: impl IntoIterator<Item = &'a str>) -> Map<String, Value> {
    names
        .into_iter()
        .map(|name| (name.to_string(), project(state, name)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Entry, MirrorAction};
    use serde_json::json;

    #[test]
    fn status_shape() {
        let mut state = MirrorState::default();
        state.apply(MirrorAction::ConfigUpdated {
            name: "[DEFAULT]".into(),
        });
        state.apply(MirrorAction::Connected);
        state.apply(MirrorAction::InitialFetchDone);

        let props = to_props(&state, ["_status"]);
        assert_eq!(
            props["_status"],
            json!({
                "authenticatedUser": null,
                "connected": true,
                "initialFetchDone": true,
                "name": "[DEFAULT]",
                "errors": {
                    "permissions": null,
                    "login": null,
                    "createUser": null,
                    "resetPassword": null
                },
                "processing": {"login": false, "createUser": false, "resetPassword": false},
                "completed": {"login": false, "createUser": false, "resetPassword": false},
                "writes": {"processing": {}, "errors": {}}
            })
        );
    }

    #[test]
    fn scalar_array_and_missing() {
        let mut state = MirrorState::new(["counter", "posts", "user"]);
        state.apply(MirrorAction::ValueReplaced {
            binding: "counter".into(),
            entry: Some(Entry::new("counter", json!(5))),
        });
        state.apply(MirrorAction::ArrayUpdated {
            binding: "posts".into(),
            key: "posts".into(),
            items: vec![Entry::new("first", json!({"id": 1, "title": "Hello"}))],
        });

        let props = to_props(&state, ["counter", "posts", "user", "unknown"]);
        assert_eq!(props["counter"], json!({"key": "counter", "value": 5}));
        assert_eq!(
            props["posts"],
            json!({
                "key": "posts",
                "value": [{"key": "first", "value": {"id": 1, "title": "Hello"}}]
            })
        );
        assert_eq!(props["user"], Value::Null);
        assert_eq!(props["unknown"], Value::Null);
    }
}
