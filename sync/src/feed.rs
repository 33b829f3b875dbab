//! Change-feed adapter.
//!
//! Opens the remote listeners that mirror one resolved binding and turns
//! their events into mirror actions:
//!
//! - Scalar and object bindings hold one value listener. Every event
//!   replaces the whole entry.
//! - Array bindings hold the four child listeners plus a value listener
//!   that only detects the end of the initial burst.
//!
//! Populated fields of scalar and object bindings get their own value
//! listeners, diffed on every parent value and closed with the parent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mirror_engine::{
    normalize_path, path_key, BindingName, CollectionType, Entry, MirrorAction, Path,
    QueryDescriptor, RemoteError, ResolvedBinding,
};
use serde_json::Value;

use crate::remote::{
    CancelCallback, ChildEvent, EventKind, ListenerId, RemoteStore, Snapshot, ValueCallback,
};
use crate::store::{Gate, LocalStore, State};
use crate::subscription::{PopulatedListener, Revoked, Subscription};

/// Tracks which resolved bindings still owe their first value.
#[derive(Debug, Default)]
pub(crate) struct InitialFetch {
    progress: Mutex<Progress>,
}

#[derive(Debug, Default)]
struct Progress {
    awaiting: BTreeSet<BindingName>,
    done: bool,
}

impl InitialFetch {
    /// Wait for a binding's first value. Ignored once the fetch is done.
    pub fn expect(&self, binding: &str) {
        let mut progress = lock(&self.progress);
        if !progress.done {
            progress.awaiting.insert(binding.to_string());
        }
    }

    /// Record a first value. Returns true when this completes the fetch.
    pub fn report(&self, binding: &str) -> bool {
        let mut progress = lock(&self.progress);
        progress.awaiting.remove(binding);
        Self::settle(&mut progress)
    }

    /// Stop waiting for a binding that was unsubscribed.
    pub fn forget(&self, binding: &str) -> bool {
        self.report(binding)
    }

    /// Complete the fetch if nothing is awaited.
    pub fn finish_if_idle(&self) -> bool {
        Self::settle(&mut lock(&self.progress))
    }

    #[cfg(test)]
    pub fn is_done(&self) -> bool {
        lock(&self.progress).done
    }

    fn settle(progress: &mut Progress) -> bool {
        if progress.done || !progress.awaiting.is_empty() {
            return false;
        }
        progress.done = true;
        true
    }
}

/// Everything a subscription's callbacks need.
pub(crate) struct Feed<S: State> {
    pub remote: Arc<dyn RemoteStore>,
    pub store: Arc<LocalStore<S>>,
    pub initial: Arc<InitialFetch>,
    pub on_cancel: Option<CancelCallback>,
}

impl<S: State> Feed<S> {
    /// Open the listeners for a resolved binding.
    ///
    /// Returns `None` for an unresolved binding.
    pub fn open(&self, binding: &str, resolved: &ResolvedBinding) -> Option<Subscription> {
        let path = resolved.path.clone()?;
        let open: Gate = Arc::new(AtomicBool::new(true));
        let mut subscription = Subscription::new(
            binding.to_string(),
            path.clone(),
            resolved.query_state.clone(),
            resolved.collection_type,
            Arc::clone(&open),
        );

        tracing::debug!(
            binding = %binding,
            path = %path,
            collection = ?resolved.collection_type,
            "Opening subscription"
        );

        let revoked = subscription.revocations();
        match resolved.collection_type {
            CollectionType::Array => {
                self.open_array(binding, &path, resolved, &open, &revoked, &mut subscription)
            }
            CollectionType::Scalar | CollectionType::Object => {
                self.open_value(binding, &path, resolved, &open, &revoked, &mut subscription)
            }
        }

        Some(subscription)
    }

    fn open_array(
        &self,
        binding: &str,
        path: &str,
        resolved: &ResolvedBinding,
        open: &Gate,
        revoked: &Revoked,
        subscription: &mut Subscription,
    ) {
        self.store.dispatch(MirrorAction::ArrayUpdated {
            binding: binding.to_string(),
            key: path_key(path).to_string(),
            items: Vec::new(),
        });

        for kind in EventKind::CHILD_KINDS {
            let store = Arc::clone(&self.store);
            let gate = Arc::clone(open);
            let name = binding.to_string();
            let id = self.remote.subscribe_child(
                path,
                &resolved.query_state,
                kind,
                Arc::new(move |event: ChildEvent| {
                    if let Some(change) = event.into_change() {
                        let action = MirrorAction::from_child_change(name.clone(), change);
                        store.dispatch_gated(&gate, action);
                    }
                }),
                self.listener_cancel(binding, kind, revoked),
            );
            subscription.add_listener(kind, id);
        }

        let marker = self.initial_marker(binding, open);
        let id = self.remote.subscribe_value(
            path,
            &resolved.query_state,
            Arc::new(move |_: Snapshot| marker()),
            self.listener_cancel(binding, EventKind::Value, revoked),
        );
        subscription.add_listener(EventKind::Value, id);
    }

    fn open_value(
        &self,
        binding: &str,
        path: &str,
        resolved: &ResolvedBinding,
        open: &Gate,
        revoked: &Revoked,
        subscription: &mut Subscription,
    ) {
        let commit = self.committer(binding, resolved.collection_type, open);
        let populated = (!resolved.populate.is_empty()).then(|| {
            Arc::new(Populated::new(
                Arc::clone(&self.remote),
                Arc::clone(&commit),
                self.cancel_handler(binding),
                resolved.populate.clone(),
            ))
        });

        let marker = self.initial_marker(binding, open);
        let gate = Arc::clone(open);
        let parent = populated.clone();
        let id = self.remote.subscribe_value(
            path,
            &resolved.query_state,
            Arc::new(move |snapshot: Snapshot| {
                if !gate.load(Ordering::SeqCst) {
                    return;
                }
                match &parent {
                    Some(populated) => populated.on_parent(snapshot),
                    None => commit(Entry::new(snapshot.key, snapshot.value)),
                }
                marker();
            }),
            self.listener_cancel(binding, EventKind::Value, revoked),
        );
        subscription.add_listener(EventKind::Value, id);

        if let Some(populated) = populated {
            subscription.set_populated(populated);
        }
    }

    /// Dispatches the replace action matching a collection type.
    fn committer(&self, binding: &str, collection_type: CollectionType, open: &Gate) -> Commit {
        let store = Arc::clone(&self.store);
        let gate = Arc::clone(open);
        let name = binding.to_string();
        Arc::new(move |entry: Entry| {
            let binding = name.clone();
            let entry = Some(entry);
            let action = match collection_type {
                CollectionType::Object => MirrorAction::ObjectReplaced { binding, entry },
                _ => MirrorAction::ValueReplaced { binding, entry },
            };
            store.dispatch_gated(&gate, action);
        })
    }

    /// Returns a closure that reports the subscription's first event.
    fn initial_marker(
        &self,
        binding: &str,
        open: &Gate,
    ) -> impl Fn() + Send + Sync + 'static {
        let store = Arc::clone(&self.store);
        let initial = Arc::clone(&self.initial);
        let gate = Arc::clone(open);
        let first = AtomicBool::new(true);
        let name = binding.to_string();
        move || {
            if !gate.load(Ordering::SeqCst) || !first.swap(false, Ordering::SeqCst) {
                return;
            }
            store.dispatch_gated(
                &gate,
                MirrorAction::InitialValueReceived {
                    binding: name.clone(),
                },
            );
            if initial.report(&name) {
                tracing::info!("Initial fetch done");
                store.dispatch(MirrorAction::InitialFetchDone);
            }
        }
    }

    /// Cancel handler that also records the listener's kind as revoked.
    fn listener_cancel(&self, binding: &str, kind: EventKind, revoked: &Revoked) -> CancelCallback {
        let revoked = Arc::clone(revoked);
        let handler = self.cancel_handler(binding);
        Arc::new(move |error: RemoteError| {
            lock(&revoked).insert(kind);
            handler(error);
        })
    }

    fn cancel_handler(&self, binding: &str) -> CancelCallback {
        let store = Arc::clone(&self.store);
        let hook = self.on_cancel.clone();
        let name = binding.to_string();
        Arc::new(move |error: RemoteError| {
            tracing::warn!(binding = %name, error = %error, "Listener cancelled by remote");
            if error.is_permission_denied() {
                store.dispatch(MirrorAction::revoke_permissions(error.clone()));
            }
            if let Some(hook) = &hook {
                hook(error);
            }
        })
    }
}

type Commit = Arc<dyn Fn(Entry) + Send + Sync>;

struct PopulatedChild {
    path: Path,
    listener: Option<ListenerId>,
    revoked: bool,
    value: Option<Value>,
}

#[derive(Default)]
struct PopulatedState {
    closed: bool,
    settling: bool,
    parent: Option<Snapshot>,
    children: BTreeMap<String, PopulatedChild>,
}

/// Secondary listeners for the reference fields of one parent value.
pub(crate) struct Populated {
    remote: Arc<dyn RemoteStore>,
    commit: Commit,
    on_cancel: CancelCallback,
    fields: Vec<String>,
    state: Mutex<PopulatedState>,
}

impl Populated {
    fn new(
        remote: Arc<dyn RemoteStore>,
        commit: Commit,
        on_cancel: CancelCallback,
        fields: Vec<String>,
    ) -> Self {
        Self {
            remote,
            commit,
            on_cancel,
            fields,
            state: Mutex::new(PopulatedState::default()),
        }
    }

    /// Paths referenced by the populated fields of a parent value.
    fn targets(&self, value: &Value) -> BTreeMap<String, Path> {
        self.fields
            .iter()
            .filter_map(|field| {
                let raw = value.get(field)?.as_str()?;
                let path = normalize_path(raw).ok().filter(|p| !p.is_empty())?;
                Some((field.clone(), path))
            })
            .collect()
    }

    fn on_parent(self: &Arc<Self>, snapshot: Snapshot) {
        let targets = self.targets(&snapshot.value);

        let (stale, fresh) = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.parent = Some(snapshot);

            let mut stale = Vec::new();
            state.children.retain(|field, child| {
                let keep = targets.get(field) == Some(&child.path);
                if !keep {
                    stale.extend(child.listener);
                }
                keep
            });

            let fresh: Vec<(String, Path)> = targets
                .into_iter()
                .filter(|(field, _)| !state.children.contains_key(field))
                .collect();
            for (field, path) in &fresh {
                state.children.insert(
                    field.clone(),
                    PopulatedChild {
                        path: path.clone(),
                        listener: None,
                        revoked: false,
                        value: None,
                    },
                );
            }
            state.settling = true;
            (stale, fresh)
        };

        for id in stale {
            self.remote.unsubscribe(id);
        }

        for (field, path) in fresh {
            let weak: Weak<Self> = Arc::downgrade(self);
            let child_field = field.clone();
            let child_path = path.clone();
            let on_value: ValueCallback = Arc::new(move |snapshot: Snapshot| {
                if let Some(populated) = weak.upgrade() {
                    populated.on_child(&child_field, &child_path, snapshot.value);
                }
            });

            let weak: Weak<Self> = Arc::downgrade(self);
            let child_field = field.clone();
            let child_path = path.clone();
            let hook = Arc::clone(&self.on_cancel);
            let on_cancel: CancelCallback = Arc::new(move |error: RemoteError| {
                if let Some(populated) = weak.upgrade() {
                    populated.on_child_cancel(&child_field, &child_path);
                }
                hook(error);
            });

            let id = self
                .remote
                .subscribe_value(&path, &QueryDescriptor::new(), on_value, on_cancel);

            let orphaned = {
                let mut state = lock(&self.state);
                let closed = state.closed;
                match state.children.get_mut(&field) {
                    Some(child) if child.path == path && !closed => {
                        if !child.revoked {
                            child.listener = Some(id);
                        }
                        false
                    }
                    _ => true,
                }
            };
            if orphaned {
                self.remote.unsubscribe(id);
            }
        }

        lock(&self.state).settling = false;
        self.commit_current();
    }

    fn on_child(&self, field: &str, path: &str, value: Value) {
        let settling = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            match state.children.get_mut(field) {
                Some(child) if child.path == path => child.value = Some(value),
                _ => return,
            }
            state.settling
        };
        if !settling {
            self.commit_current();
        }
    }

    fn on_child_cancel(&self, field: &str, path: &str) {
        let mut state = lock(&self.state);
        if let Some(child) = state.children.get_mut(field) {
            if child.path == path {
                child.revoked = true;
                child.listener = None;
            }
        }
    }

    /// Commit the parent value with every received child substituted in.
    fn commit_current(&self) {
        let entry = {
            let state = lock(&self.state);
            if state.closed {
                return;
            }
            let Some(parent) = &state.parent else { return };
            let mut value = parent.value.clone();
            if let Value::Object(fields) = &mut value {
                for (field, child) in &state.children {
                    if let Some(child_value) = &child.value {
                        fields.insert(field.clone(), child_value.clone());
                    }
                }
            }
            Entry::new(parent.key.clone(), value)
        };
        (self.commit)(entry);
    }

    pub fn listeners(&self) -> BTreeMap<String, PopulatedListener> {
        lock(&self.state)
            .children
            .iter()
            .filter_map(|(field, child)| {
                let listener = child.listener?;
                Some((
                    field.clone(),
                    PopulatedListener {
                        path: child.path.clone(),
                        listener,
                    },
                ))
            })
            .collect()
    }

    pub fn close(&self, remote: &dyn RemoteStore) {
        let children = {
            let mut state = lock(&self.state);
            state.closed = true;
            std::mem::take(&mut state.children)
        };
        for child in children.into_values() {
            if let Some(id) = child.listener {
                remote.unsubscribe(id);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
