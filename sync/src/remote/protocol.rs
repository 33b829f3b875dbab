//! Remote store protocol definitions.
//!
//! Events are delivered through callbacks registered per listener. A listener
//! is identified by a [`ListenerId`]; unsubscribing it guarantees that its
//! callbacks are not invoked after `unsubscribe` returns.

use std::fmt;
use std::sync::Arc;

use mirror_engine::{AuthUser, ChildChange, ChildKey, Path, QueryDescriptor, RemoteError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a registered listener or observer.
pub type ListenerId = u64;

/// Kinds of events a listener can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Value,
    ChildAdded,
    ChildChanged,
    ChildMoved,
    ChildRemoved,
}

impl EventKind {
    /// The four sibling-relative kinds, in registration order.
    pub const CHILD_KINDS: [EventKind; 4] = [
        EventKind::ChildAdded,
        EventKind::ChildChanged,
        EventKind::ChildMoved,
        EventKind::ChildRemoved,
    ];

    pub fn is_child(self) -> bool {
        self != EventKind::Value
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Value => write!(f, "value"),
            EventKind::ChildAdded => write!(f, "child_added"),
            EventKind::ChildChanged => write!(f, "child_changed"),
            EventKind::ChildMoved => write!(f, "child_moved"),
            EventKind::ChildRemoved => write!(f, "child_removed"),
        }
    }
}

/// A value at a location. `key` is the last path segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub key: ChildKey,
    pub value: Value,
}

impl Snapshot {
    pub fn new(key: impl Into<ChildKey>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Check if the location holds no data.
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }
}

/// A sibling-relative child event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildEvent {
    pub kind: EventKind,
    pub snapshot: Snapshot,
    /// Key of the sibling this child now follows (`None` = first)
    pub previous_key: Option<ChildKey>,
}

impl ChildEvent {
    /// Convert into the reconciler's change type.
    pub fn into_change(self) -> Option<ChildChange> {
        let Snapshot { key, value } = self.snapshot;
        match self.kind {
            EventKind::ChildAdded => Some(ChildChange::Added {
                key,
                value,
                previous_key: self.previous_key,
            }),
            EventKind::ChildChanged => Some(ChildChange::Changed { key, value }),
            EventKind::ChildMoved => Some(ChildChange::Moved {
                key,
                previous_key: self.previous_key,
            }),
            EventKind::ChildRemoved => Some(ChildChange::Removed { key }),
            EventKind::Value => None,
        }
    }
}

/// Callback for whole-value events.
pub type ValueCallback = Arc<dyn Fn(Snapshot) + Send + Sync>;
/// Callback for child events.
pub type ChildCallback = Arc<dyn Fn(ChildEvent) + Send + Sync>;
/// Called once when the remote cancels a listener (e.g. permission denied).
pub type CancelCallback = Arc<dyn Fn(RemoteError) + Send + Sync>;
/// Connectivity observer.
pub type ConnectedCallback = Arc<dyn Fn(bool) + Send + Sync>;
/// Authentication state observer.
pub type AuthCallback = Arc<dyn Fn(Option<AuthUser>) + Send + Sync>;
/// Completion of a write or auth request.
pub type Completion = Box<dyn FnOnce(Result<(), RemoteError>) + Send>;

/// Write methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMethod {
    /// Replace the value at the path
    Set,
    /// Merge the object's children into the value at the path
    Update,
    /// Add a child under a generated, chronologically ordered key
    Push,
    /// Delete the value at the path
    Remove,
}

/// A write request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    pub method: WriteMethod,
    pub path: Path,
    #[serde(default)]
    pub value: Value,
}

impl WriteRequest {
    pub fn set(path: impl Into<Path>, value: Value) -> Self {
        Self {
            method: WriteMethod::Set,
            path: path.into(),
            value,
        }
    }

    pub fn update(path: impl Into<Path>, value: Value) -> Self {
        Self {
            method: WriteMethod::Update,
            path: path.into(),
            value,
        }
    }

    pub fn push(path: impl Into<Path>, value: Value) -> Self {
        Self {
            method: WriteMethod::Push,
            path: path.into(),
            value,
        }
    }

    pub fn remove(path: impl Into<Path>) -> Self {
        Self {
            method: WriteMethod::Remove,
            path: path.into(),
            value: Value::Null,
        }
    }
}

/// A path-addressable hierarchical data source.
///
/// Implementations must stop invoking a listener's callbacks once
/// [`RemoteStore::unsubscribe`] has returned for it. Initial data may be
/// delivered synchronously from inside `subscribe_*`, so callers must not
/// hold locks their callbacks need.
pub trait RemoteStore: Send + Sync {
    /// Listen for whole-value changes at `path`.
    ///
    /// The current value is delivered first, then every change.
    fn subscribe_value(
        &self,
        path: &str,
        query: &QueryDescriptor,
        on_value: ValueCallback,
        on_cancel: CancelCallback,
    ) -> ListenerId;

    /// Listen for one kind of sibling-relative child event at `path`.
    ///
    /// `ChildAdded` listeners receive the existing children first, in order.
    fn subscribe_child(
        &self,
        path: &str,
        query: &QueryDescriptor,
        kind: EventKind,
        on_child: ChildCallback,
        on_cancel: CancelCallback,
    ) -> ListenerId;

    /// Detach a listener or observer. Unknown ids are ignored.
    fn unsubscribe(&self, id: ListenerId);

    /// Issue a write. `done` is called exactly once.
    fn write(&self, request: WriteRequest, done: Completion);

    /// Observe connectivity. The current state is delivered first.
    fn on_connected(&self, callback: ConnectedCallback) -> ListenerId;

    /// Observe authentication state. The current user is delivered first.
    fn on_auth_state(&self, callback: AuthCallback) -> ListenerId;

    fn password_login(&self, email: &str, password: &str, done: Completion);

    fn provider_login(&self, provider: &str, scopes: &[String], done: Completion);

    fn logout(&self, done: Completion);

    fn create_user(&self, email: &str, password: &str, done: Completion);

    fn reset_password(&self, email: &str, done: Completion);
}
