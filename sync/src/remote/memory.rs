//! In-memory remote store.
//!
//! Holds a JSON tree and emits value and sibling-relative child events to
//! registered listeners after every write, the way a realtime database
//! would. Events are delivered synchronously on the writing thread and never
//! while internal locks are held, so callbacks may call back into the store.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use mirror_engine::{
    normalize_path, path_key, AuthUser, OrderBy, QueryDescriptor, RemoteError, RemoteErrorCode,
};
use serde_json::{Map, Value};

use super::{
    AuthCallback, CancelCallback, ChildCallback, ChildEvent, Completion, ConnectedCallback,
    EventKind, ListenerId, RemoteStore, Snapshot, ValueCallback, WriteMethod, WriteRequest,
};

#[derive(Clone)]
enum Target {
    Value(ValueCallback),
    Child(EventKind, ChildCallback),
}

impl Target {
    fn kind(&self) -> EventKind {
        match self {
            Target::Value(_) => EventKind::Value,
            Target::Child(kind, _) => *kind,
        }
    }
}

/// A registered data listener.
struct Listener {
    path: String,
    query: QueryDescriptor,
    target: Target,
    on_cancel: CancelCallback,
}

enum Delivery {
    Value(Snapshot),
    Child(ChildEvent),
}

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    password: String,
}

/// An in-process [`RemoteStore`].
///
/// Thread-safe and can be shared via `Arc`.
pub struct MemoryRemote {
    data: Mutex<Value>,
    listeners: DashMap<ListenerId, Listener>,
    connectivity: DashMap<ListenerId, ConnectedCallback>,
    auth_observers: DashMap<ListenerId, AuthCallback>,
    next_id: AtomicU64,
    push_counter: AtomicU64,
    connected: AtomicBool,
    denied_reads: Mutex<Vec<String>>,
    denied_writes: Mutex<Vec<String>>,
    accounts: Mutex<HashMap<String, Account>>,
    current_user: Mutex<Option<AuthUser>>,
    password_resets: Mutex<Vec<String>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Create an empty, disconnected store.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Value::Null),
            listeners: DashMap::new(),
            connectivity: DashMap::new(),
            auth_observers: DashMap::new(),
            next_id: AtomicU64::new(1),
            push_counter: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            denied_reads: Mutex::new(Vec::new()),
            denied_writes: Mutex::new(Vec::new()),
            accounts: Mutex::new(HashMap::new()),
            current_user: Mutex::new(None),
            password_resets: Mutex::new(Vec::new()),
        }
    }

    /// Create a store seeded with `data`, wrapped in Arc for sharing.
    pub fn with_data(data: Value) -> Arc<Self> {
        let remote = Self::new();
        *lock(&remote.data) = clean(data);
        Arc::new(remote)
    }

    /// Current value at a path (`Null` when absent).
    pub fn value_at(&self, path: &str) -> Value {
        let path = normalize_path(path).unwrap_or_default();
        value_at(&lock(&self.data), &path).clone()
    }

    /// Replace the value at a path, notifying listeners.
    pub fn set_value(&self, path: &str, value: Value) -> Result<(), RemoteError> {
        self.apply_write(WriteRequest::set(path, value)).map(|_| ())
    }

    /// Push a child under a generated key, returning the key.
    pub fn push_value(&self, path: &str, value: Value) -> Result<String, RemoteError> {
        self.apply_write(WriteRequest::push(path, value))
            .map(|key| key.unwrap_or_default())
    }

    /// Flip connectivity, notifying observers on change.
    pub fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, AtomicOrdering::SeqCst) == connected {
            return;
        }
        tracing::debug!(connected, "Remote connectivity changed");
        let observers: Vec<ConnectedCallback> = self
            .connectivity
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for observer in observers {
            observer(connected);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(AtomicOrdering::SeqCst)
    }

    /// Deny reads under `prefix`. Live listeners there are cancelled.
    pub fn deny_reads(&self, prefix: &str) {
        let prefix = normalize_path(prefix).unwrap_or_default();
        lock(&self.denied_reads).push(prefix.clone());

        let revoked: Vec<ListenerId> = self
            .listeners
            .iter()
            .filter(|entry| is_under(&entry.value().path, &prefix))
            .map(|entry| *entry.key())
            .collect();

        for id in revoked {
            if let Some((_, listener)) = self.listeners.remove(&id) {
                tracing::debug!(listener = id, path = %listener.path, "Listener revoked");
                (listener.on_cancel)(RemoteError::permission_denied(&listener.path));
            }
        }
    }

    /// Deny writes under `prefix`.
    pub fn deny_writes(&self, prefix: &str) {
        let prefix = normalize_path(prefix).unwrap_or_default();
        lock(&self.denied_writes).push(prefix);
    }

    /// Register an account without signing in. Returns the uid.
    pub fn add_user(&self, email: &str, password: &str) -> String {
        let uid = uuid::Uuid::new_v4().to_string();
        lock(&self.accounts).insert(
            email.to_string(),
            Account {
                uid: uid.clone(),
                password: password.to_string(),
            },
        );
        uid
    }

    /// Emails that requested a password reset, in order.
    pub fn password_resets(&self) -> Vec<String> {
        lock(&self.password_resets).clone()
    }

    /// Number of live data listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Kinds of the live listeners at a path.
    pub fn listeners_at(&self, path: &str) -> Vec<EventKind> {
        let path = normalize_path(path).unwrap_or_default();
        let mut kinds: Vec<(ListenerId, EventKind)> = self
            .listeners
            .iter()
            .filter(|entry| entry.value().path == path)
            .map(|entry| (*entry.key(), entry.value().target.kind()))
            .collect();
        kinds.sort();
        kinds.into_iter().map(|(_, kind)| kind).collect()
    }

    fn next_id(&self) -> ListenerId {
        self.next_id.fetch_add(1, AtomicOrdering::SeqCst)
    }

    fn read_denied(&self, path: &str) -> bool {
        lock(&self.denied_reads).iter().any(|prefix| is_under(path, prefix))
    }

    fn write_denied(&self, path: &str) -> bool {
        lock(&self.denied_writes).iter().any(|prefix| is_under(path, prefix))
    }

    fn register(
        &self,
        path: &str,
        query: &QueryDescriptor,
        target: Target,
        on_cancel: CancelCallback,
    ) -> Option<(ListenerId, String)> {
        let id = self.next_id();
        let path = match normalize_path(path) {
            Ok(path) => path,
            Err(err) => {
                on_cancel(RemoteError::new(RemoteErrorCode::InvalidRequest, err.to_string()));
                return None;
            }
        };
        if self.read_denied(&path) {
            tracing::debug!(path = %path, "Subscription denied");
            on_cancel(RemoteError::permission_denied(&path));
            return None;
        }

        self.listeners.insert(
            id,
            Listener {
                path: path.clone(),
                query: query.clone(),
                target,
                on_cancel,
            },
        );
        Some((id, path))
    }

    /// Apply a write and notify listeners. Returns the generated key for pushes.
    fn apply_write(&self, request: WriteRequest) -> Result<Option<String>, RemoteError> {
        let path = normalize_path(&request.path)
            .map_err(|e| RemoteError::new(RemoteErrorCode::InvalidRequest, e.to_string()))?;
        if self.write_denied(&path) {
            return Err(RemoteError::permission_denied(&path));
        }

        let mut pushed = None;
        let (before, after) = {
            let mut data = lock(&self.data);
            let before = data.clone();
            match request.method {
                WriteMethod::Set => set_at(&mut data, &path, request.value),
                WriteMethod::Remove => set_at(&mut data, &path, Value::Null),
                WriteMethod::Update => {
                    let Value::Object(children) = request.value else {
                        return Err(RemoteError::new(
                            RemoteErrorCode::InvalidRequest,
                            "update requires an object",
                        ));
                    };
                    for (key, value) in children {
                        set_at(&mut data, &join(&path, &key), value);
                    }
                }
                WriteMethod::Push => {
                    let n = self.push_counter.fetch_add(1, AtomicOrdering::SeqCst);
                    let key = format!("-M{:018}", n);
                    set_at(&mut data, &join(&path, &key), request.value);
                    pushed = Some(key);
                }
            }
            (before, data.clone())
        };

        self.notify(&before, &after);
        Ok(pushed)
    }

    /// Compute and deliver events for every listener affected by a write.
    fn notify(&self, before: &Value, after: &Value) {
        let mut specs: Vec<(ListenerId, String, QueryDescriptor, EventKind)> = self
            .listeners
            .iter()
            .map(|entry| {
                let l = entry.value();
                (*entry.key(), l.path.clone(), l.query.clone(), l.target.kind())
            })
            .collect();
        specs.sort_by_key(|(id, ..)| *id);

        let mut deliveries = Vec::new();

        // Child listeners first, grouped by (path, query) so that events of
        // different kinds interleave in the order they happened.
        let mut groups: Vec<(&str, &QueryDescriptor)> = Vec::new();
        for (_, path, query, kind) in &specs {
            if kind.is_child() && !groups.iter().any(|(p, q)| p == path && *q == query) {
                groups.push((path, query));
            }
        }
        for (path, query) in groups {
            let old = ordered_children(value_at(before, path), query);
            let new = ordered_children(value_at(after, path), query);
            for event in diff_children(&old, &new) {
                for (id, p, q, kind) in &specs {
                    if *kind == event.kind && p == path && q == query {
                        deliveries.push((*id, Delivery::Child(event.clone())));
                    }
                }
            }
        }

        for (id, path, query, kind) in &specs {
            if *kind != EventKind::Value {
                continue;
            }
            let old = query_value(value_at(before, path), query);
            let new = query_value(value_at(after, path), query);
            if old != new {
                deliveries.push((*id, Delivery::Value(Snapshot::new(path_key(path), new))));
            }
        }

        self.deliver(deliveries);
    }

    /// Invoke callbacks of listeners that are still registered.
    fn deliver(&self, deliveries: Vec<(ListenerId, Delivery)>) {
        for (id, delivery) in deliveries {
            let target = match self.listeners.get(&id) {
                Some(listener) => listener.target.clone(),
                None => continue,
            };
            match (target, delivery) {
                (Target::Value(callback), Delivery::Value(snapshot)) => callback(snapshot),
                (Target::Child(_, callback), Delivery::Child(event)) => callback(event),
                _ => {}
            }
        }
    }

    fn sign_in(&self, user: Option<AuthUser>) {
        *lock(&self.current_user) = user.clone();
        let observers: Vec<AuthCallback> = self
            .auth_observers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for observer in observers {
            observer(user.clone());
        }
    }
}

impl RemoteStore for MemoryRemote {
    fn subscribe_value(
        &self,
        path: &str,
        query: &QueryDescriptor,
        on_value: ValueCallback,
        on_cancel: CancelCallback,
    ) -> ListenerId {
        let Some((id, path)) = self.register(path, query, Target::Value(on_value), on_cancel)
        else {
            return self.next_id();
        };

        let current = query_value(value_at(&lock(&self.data), &path), query);
        self.deliver(vec![(
            id,
            Delivery::Value(Snapshot::new(path_key(&path), current)),
        )]);
        id
    }

    fn subscribe_child(
        &self,
        path: &str,
        query: &QueryDescriptor,
        kind: EventKind,
        on_child: ChildCallback,
        on_cancel: CancelCallback,
    ) -> ListenerId {
        let Some((id, path)) = self.register(path, query, Target::Child(kind, on_child), on_cancel)
        else {
            return self.next_id();
        };

        if kind == EventKind::ChildAdded {
            let children = ordered_children(value_at(&lock(&self.data), &path), query);
            let initial = diff_children(&[], &children)
                .into_iter()
                .map(|event| (id, Delivery::Child(event)))
                .collect();
            self.deliver(initial);
        }
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        if self.listeners.remove(&id).is_none()
            && self.connectivity.remove(&id).is_none()
            && self.auth_observers.remove(&id).is_none()
        {
            tracing::trace!(listener = id, "Unsubscribe of unknown listener");
        }
    }

    fn write(&self, request: WriteRequest, done: Completion) {
        done(self.apply_write(request).map(|_| ()));
    }

    fn on_connected(&self, callback: ConnectedCallback) -> ListenerId {
        let id = self.next_id();
        self.connectivity.insert(id, Arc::clone(&callback));
        callback(self.is_connected());
        id
    }

    fn on_auth_state(&self, callback: AuthCallback) -> ListenerId {
        let id = self.next_id();
        self.auth_observers.insert(id, Arc::clone(&callback));
        let current = lock(&self.current_user).clone();
        callback(current);
        id
    }

    fn password_login(&self, email: &str, password: &str, done: Completion) {
        let account = lock(&self.accounts).get(email).cloned();
        match account {
            Some(account) if account.password == password => {
                self.sign_in(Some(AuthUser::new(account.uid).with_email(email).with_provider("password")));
                done(Ok(()));
            }
            Some(_) => done(Err(RemoteError::new(
                RemoteErrorCode::InvalidCredentials,
                "the password is invalid",
            ))),
            None => done(Err(RemoteError::new(
                RemoteErrorCode::UserNotFound,
                format!("no user record for '{}'", email),
            ))),
        }
    }

    fn provider_login(&self, provider: &str, scopes: &[String], done: Completion) {
        tracing::debug!(provider = %provider, scopes = ?scopes, "Provider login");
        self.sign_in(Some(
            AuthUser::new(format!("{}-user", provider)).with_provider(provider),
        ));
        done(Ok(()));
    }

    fn logout(&self, done: Completion) {
        self.sign_in(None);
        done(Ok(()));
    }

    fn create_user(&self, email: &str, password: &str, done: Completion) {
        if lock(&self.accounts).contains_key(email) {
            done(Err(RemoteError::new(
                RemoteErrorCode::EmailInUse,
                format!("'{}' is already in use", email),
            )));
            return;
        }
        let uid = self.add_user(email, password);
        self.sign_in(Some(AuthUser::new(uid).with_email(email).with_provider("password")));
        done(Ok(()));
    }

    fn reset_password(&self, email: &str, done: Completion) {
        if !lock(&self.accounts).contains_key(email) {
            done(Err(RemoteError::new(
                RemoteErrorCode::UserNotFound,
                format!("no user record for '{}'", email),
            )));
            return;
        }
        lock(&self.password_resets).push(email.to_string());
        done(Ok(()));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", path, key)
    }
}

fn is_under(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || (path.starts_with(prefix) && path[prefix.len()..].starts_with('/'))
}

fn value_at<'a>(root: &'a Value, path: &str) -> &'a Value {
    if path.is_empty() {
        return root;
    }
    let mut current = root;
    for segment in path.split('/') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return &Value::Null,
        }
    }
    current
}

/// Write `value` at `path`, pruning nulls and empty objects along the way.
fn set_at(root: &mut Value, path: &str, value: Value) {
    let value = clean(value);
    if path.is_empty() {
        *root = value;
        return;
    }
    let segments: Vec<&str> = path.split('/').collect();
    set_segments(root, &segments, value);
}

fn set_segments(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(children) = node {
        let child = children.entry(first.to_string()).or_insert(Value::Null);
        set_segments(child, rest, value);
        if child.is_null() {
            children.remove(*first);
        }
        if children.is_empty() {
            *node = Value::Null;
        }
    }
}

/// Normalize a value the way the store keeps it: no nulls inside objects,
/// no empty objects, arrays stored as index-keyed objects.
fn clean(value: Value) -> Value {
    match value {
        Value::Object(children) => {
            let cleaned: Map<String, Value> = children
                .into_iter()
                .map(|(k, v)| (k, clean(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        Value::Array(items) => clean(Value::Object(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
        )),
        other => other,
    }
}

/// Rank of a value's type in the store's cross-type ordering.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) | Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Integer-like keys sort numerically before all other keys.
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn ordering_value(order: &OrderBy, key: &str, value: &Value) -> Value {
    match order {
        OrderBy::Key | OrderBy::Priority => Value::String(key.to_string()),
        OrderBy::Child(child) => value_at(value, child).clone(),
        OrderBy::Value => value.clone(),
    }
}

/// Children of a location after applying ordering, bounds and limits.
fn ordered_children(value: &Value, query: &QueryDescriptor) -> Vec<(String, Value)> {
    let Value::Object(children) = value else {
        return Vec::new();
    };

    let order = query.order_by();
    let mut items: Vec<(String, Value)> = children
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let compare = |a: &(String, Value), b: &(String, Value)| match &order {
        OrderBy::Key | OrderBy::Priority => compare_keys(&a.0, &b.0),
        _ => compare_values(
            &ordering_value(&order, &a.0, &a.1),
            &ordering_value(&order, &b.0, &b.1),
        )
        .then_with(|| compare_keys(&a.0, &b.0)),
    };
    items.sort_by(compare);

    let in_bounds = |(key, value): &(String, Value)| {
        let v = ordering_value(&order, key, value);
        let cmp = |bound: &Value| match &order {
            OrderBy::Key | OrderBy::Priority => match bound {
                Value::String(s) => compare_keys(key, s),
                other => compare_keys(key, &other.to_string()),
            },
            _ => compare_values(&v, bound),
        };
        query.start().map_or(true, |s| cmp(s) != Ordering::Less)
            && query.end().map_or(true, |e| cmp(e) != Ordering::Greater)
    };
    items.retain(in_bounds);

    match query.limit() {
        Some((n, false)) => items.truncate(n),
        Some((n, true)) if items.len() > n => {
            items.drain(..items.len() - n);
        }
        _ => {}
    }
    items
}

/// Value seen by a value listener with a query.
fn query_value(value: &Value, query: &QueryDescriptor) -> Value {
    if query.is_empty() {
        return value.clone();
    }
    let children: Map<String, Value> = ordered_children(value, query).into_iter().collect();
    if children.is_empty() {
        Value::Null
    } else {
        Value::Object(children)
    }
}

/// Sibling-relative events turning `old` into `new`.
///
/// Replaying the events in order on a copy of `old` yields exactly `new`:
/// removals first, then a left-to-right pass that adds or moves each child
/// into its final slot.
fn diff_children(old: &[(String, Value)], new: &[(String, Value)]) -> Vec<ChildEvent> {
    let new_keys: HashSet<&str> = new.iter().map(|(k, _)| k.as_str()).collect();
    let old_values: HashMap<&str, &Value> = old.iter().map(|(k, v)| (k.as_str(), v)).collect();

    let mut events = Vec::new();
    let mut working: Vec<&str> = Vec::with_capacity(old.len());

    for (key, value) in old {
        if new_keys.contains(key.as_str()) {
            working.push(key);
        } else {
            events.push(ChildEvent {
                kind: EventKind::ChildRemoved,
                snapshot: Snapshot::new(key.clone(), value.clone()),
                previous_key: None,
            });
        }
    }

    for (i, (key, value)) in new.iter().enumerate() {
        let previous_key = i.checked_sub(1).map(|p| new[p].0.clone());
        let snapshot = Snapshot::new(key.clone(), value.clone());

        match old_values.get(key.as_str()) {
            None => {
                working.insert(i, key);
                events.push(ChildEvent {
                    kind: EventKind::ChildAdded,
                    snapshot,
                    previous_key,
                });
            }
            Some(old_value) => {
                let position = working.iter().position(|k| *k == key).unwrap_or(i);
                if position != i {
                    let moved = working.remove(position);
                    working.insert(i, moved);
                    events.push(ChildEvent {
                        kind: EventKind::ChildMoved,
                        snapshot: snapshot.clone(),
                        previous_key: previous_key.clone(),
                    });
                }
                if *old_value != value {
                    events.push(ChildEvent {
                        kind: EventKind::ChildChanged,
                        snapshot,
                        previous_key,
                    });
                }
            }
        }
    }

    events
}
