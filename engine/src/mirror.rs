//! Mirror state - the canonical local copy of every binding plus session status.
//!
//! The mirror only changes through [`MirrorAction`]s. Each action is one
//! state transition, applied by [`MirrorState::apply`], which reports whether
//! anything actually changed so observers can skip redundant notifications.

use crate::{
    AuthSlot, AuthUser, BindingName, ChildChange, ChildKey, Entry, ErrorSlot, ErrorSlots,
    FlagSlots, OrderedCollection, Path, RemoteError, StoreEntry, WriteError, WriteId,
    WriteTracker,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A single state transition of the mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MirrorAction {
    /// Record the session name
    ConfigUpdated { name: String },

    #[serde(rename_all = "camelCase")]
    ArrayChildAdded {
        binding: BindingName,
        key: ChildKey,
        value: Value,
        previous_key: Option<ChildKey>,
    },
    ArrayChildChanged {
        binding: BindingName,
        key: ChildKey,
        value: Value,
    },
    #[serde(rename_all = "camelCase")]
    ArrayChildMoved {
        binding: BindingName,
        key: ChildKey,
        previous_key: Option<ChildKey>,
    },
    ArrayChildRemoved { binding: BindingName, key: ChildKey },
    /// Replace a whole array binding
    ArrayUpdated {
        binding: BindingName,
        key: ChildKey,
        items: Vec<Entry>,
    },
    /// Replace an object binding wholesale, even with an equal value
    ObjectReplaced {
        binding: BindingName,
        entry: Option<Entry>,
    },
    /// Replace a binding's value; equal values are skipped
    ValueReplaced {
        binding: BindingName,
        entry: Option<Entry>,
    },

    InitialValueReceived { binding: BindingName },
    InitialFetchDone,
    Connected,
    Disconnected,

    UserAuthenticated { user: AuthUser },
    UserUnauthenticated,

    ErrorUpdated {
        slot: ErrorSlot,
        error: Option<RemoteError>,
    },
    ProcessingUpdated { slot: AuthSlot, value: bool },
    CompletedUpdated { slot: AuthSlot, value: bool },

    WriteProcessingUpdated {
        path: Path,
        id: WriteId,
        value: bool,
    },
    /// `None` clears every error recorded for the path
    WriteErrorsUpdated {
        path: Path,
        error: Option<WriteError>,
    },
}

impl MirrorAction {
    /// Build the array action matching a sibling-relative change.
    pub fn from_child_change(binding: impl Into<BindingName>, change: ChildChange) -> Self {
        let binding = binding.into();
        match change {
            ChildChange::Added {
                key,
                value,
                previous_key,
            } => MirrorAction::ArrayChildAdded {
                binding,
                key,
                value,
                previous_key,
            },
            ChildChange::Changed { key, value } => {
                MirrorAction::ArrayChildChanged { binding, key, value }
            }
            ChildChange::Moved { key, previous_key } => MirrorAction::ArrayChildMoved {
                binding,
                key,
                previous_key,
            },
            ChildChange::Removed { key } => MirrorAction::ArrayChildRemoved { binding, key },
        }
    }

    /// Revoke permissions: the process-wide permission error slot.
    pub fn revoke_permissions(error: RemoteError) -> Self {
        MirrorAction::ErrorUpdated {
            slot: ErrorSlot::Permissions,
            error: Some(error),
        }
    }

    /// Binding targeted by this action, if any.
    pub fn binding(&self) -> Option<&str> {
        match self {
            MirrorAction::ArrayChildAdded { binding, .. }
            | MirrorAction::ArrayChildChanged { binding, .. }
            | MirrorAction::ArrayChildMoved { binding, .. }
            | MirrorAction::ArrayChildRemoved { binding, .. }
            | MirrorAction::ArrayUpdated { binding, .. }
            | MirrorAction::ObjectReplaced { binding, .. }
            | MirrorAction::ValueReplaced { binding, .. }
            | MirrorAction::InitialValueReceived { binding } => Some(binding),
            _ => None,
        }
    }
}

/// The local mirror of one sync session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorState {
    /// Session name
    pub name: Option<String>,
    pub authenticated_user: Option<AuthUser>,
    pub connected: bool,
    pub initial_fetch_done: bool,
    pub initial_values_received: BTreeSet<BindingName>,
    /// One slot per binding; `None` while unresolved or before the first value
    pub stores: BTreeMap<BindingName, Option<StoreEntry>>,
    pub errors: ErrorSlots,
    pub processing: FlagSlots,
    pub completed: FlagSlots,
    pub writes: WriteTracker,
}

impl MirrorState {
    /// Create a mirror with every binding's slot set to `None`.
    pub fn new<I, N>(bindings: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<BindingName>,
    {
        Self {
            stores: bindings.into_iter().map(|name| (name.into(), None)).collect(),
            ..Default::default()
        }
    }

    /// Mirrored entry of a binding.
    pub fn store(&self, binding: &str) -> Option<&StoreEntry> {
        self.stores.get(binding).and_then(Option::as_ref)
    }

    /// Ordered children of an array binding.
    pub fn list(&self, binding: &str) -> Option<&OrderedCollection> {
        self.store(binding).and_then(StoreEntry::as_list)
    }

    /// Check if a binding has reported its first value.
    pub fn has_initial_value(&self, binding: &str) -> bool {
        self.initial_values_received.contains(binding)
    }

    /// Apply one action. Returns whether the state changed.
    pub fn apply(&mut self, action: MirrorAction) -> bool {
        match action {
            MirrorAction::ConfigUpdated { name } => replace(&mut self.name, Some(name)),

            MirrorAction::ArrayChildAdded {
                binding,
                key,
                value,
                previous_key,
            } => self.apply_child(
                &binding,
                ChildChange::Added {
                    key,
                    value,
                    previous_key,
                },
            ),
            MirrorAction::ArrayChildChanged {
                binding,
                key,
                value,
            } => self.apply_child(&binding, ChildChange::Changed { key, value }),
            MirrorAction::ArrayChildMoved {
                binding,
                key,
                previous_key,
            } => self.apply_child(&binding, ChildChange::Moved { key, previous_key }),
            MirrorAction::ArrayChildRemoved { binding, key } => {
                self.apply_child(&binding, ChildChange::Removed { key })
            }
            MirrorAction::ArrayUpdated {
                binding,
                key,
                items,
            } => {
                let entry = StoreEntry::List {
                    key,
                    value: items.into_iter().collect(),
                };
                replace(self.stores.entry(binding).or_default(), Some(entry))
            }
            MirrorAction::ObjectReplaced { binding, entry } => {
                self.stores.insert(binding, entry.map(StoreEntry::Value));
                true
            }
            MirrorAction::ValueReplaced { binding, entry } => replace(
                self.stores.entry(binding).or_default(),
                entry.map(StoreEntry::Value),
            ),

            MirrorAction::InitialValueReceived { binding } => {
                self.initial_values_received.insert(binding)
            }
            MirrorAction::InitialFetchDone => replace(&mut self.initial_fetch_done, true),
            MirrorAction::Connected => replace(&mut self.connected, true),
            MirrorAction::Disconnected => replace(&mut self.connected, false),

            MirrorAction::UserAuthenticated { user } => {
                replace(&mut self.authenticated_user, Some(user))
            }
            MirrorAction::UserUnauthenticated => replace(&mut self.authenticated_user, None),

            MirrorAction::ErrorUpdated { slot, error } => {
                replace(self.errors.slot_mut(slot), error)
            }
            MirrorAction::ProcessingUpdated { slot, value } => {
                replace(self.processing.slot_mut(slot), value)
            }
            MirrorAction::CompletedUpdated { slot, value } => {
                replace(self.completed.slot_mut(slot), value)
            }

            MirrorAction::WriteProcessingUpdated { path, id, value } => {
                if value {
                    self.writes.start(&path, &id)
                } else {
                    self.writes.finish(&path, &id)
                }
            }
            MirrorAction::WriteErrorsUpdated { path, error } => match error {
                Some(error) => {
                    self.writes.record_error(&path, error);
                    true
                }
                None => self.writes.clear_errors(&path),
            },
        }
    }

    fn apply_child(&mut self, binding: &str, change: ChildChange) -> bool {
        match self
            .stores
            .get_mut(binding)
            .and_then(|slot| slot.as_mut())
            .and_then(StoreEntry::as_list_mut)
        {
            Some(list) => change.apply(list),
            None => {
                tracing::trace!(binding = %binding, key = %change.key(), "Child event for unmirrored binding ignored");
                false
            }
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
