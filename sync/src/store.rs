//! Observable local store holding the mirror.
//!
//! The store keeps immutable `Arc<S>` versions. Every dispatched action is
//! reduced into a new version and observers see each version that changed,
//! one transition at a time.
//!
//! One thread drains at a time. A dispatch issued by the draining thread
//! itself (for example from inside an observer) is queued and applied after
//! the current round, never nested. A dispatch from any other thread waits
//! for the running drain and returns once its action is applied.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use mirror_engine::{MirrorAction, MirrorState};

/// Application state that embeds a mirror.
///
/// Path functions of bindings are evaluated against the whole state, so an
/// application can keep its own fields next to the mirror and derive paths
/// from them.
pub trait State: Clone + Send + Sync + 'static {
    type Action: From<MirrorAction> + Send + 'static;

    /// Apply one action. Returns whether the state changed.
    fn reduce(&mut self, action: Self::Action) -> bool;

    fn mirror(&self) -> &MirrorState;
}

impl State for MirrorState {
    type Action = MirrorAction;

    fn reduce(&mut self, action: MirrorAction) -> bool {
        self.apply(action)
    }

    fn mirror(&self) -> &MirrorState {
        self
    }
}

pub type ObserverId = u64;

/// Called with every new state version.
pub type Observer<S> = Arc<dyn Fn(&Arc<S>) + Send + Sync>;

/// Open flag of a subscription. Gated actions are dropped once it is false.
pub(crate) type Gate = Arc<AtomicBool>;

struct Pending<A> {
    action: A,
    gate: Option<Gate>,
}

pub struct LocalStore<S: State> {
    state: Mutex<Arc<S>>,
    queue: Mutex<VecDeque<Pending<S::Action>>>,
    drain: Mutex<()>,
    drainer: Mutex<Option<ThreadId>>,
    observers: DashMap<ObserverId, Observer<S>>,
    next_id: AtomicU64,
}

impl<S: State> LocalStore<S> {
    pub fn new(initial: S) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Arc::new(initial)),
            queue: Mutex::new(VecDeque::new()),
            drain: Mutex::new(()),
            drainer: Mutex::new(None),
            observers: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Current state version.
    pub fn state(&self) -> Arc<S> {
        Arc::clone(&lock(&self.state))
    }

    /// Register an observer of state changes.
    pub fn subscribe(&self, observer: Observer<S>) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers.insert(id, observer);
        id
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.remove(&id).is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Apply an action.
    ///
    /// When called from inside an observer the action is applied after the
    /// current notification round returns. Otherwise it is applied before
    /// this returns.
    pub fn dispatch(&self, action: impl Into<S::Action>) {
        self.enqueue(Pending {
            action: action.into(),
            gate: None,
        });
    }

    /// Apply an action only if `gate` is still open when its turn comes.
    ///
    /// The gate is read inside the drain, so a close that dispatches its own
    /// action afterwards always wins over an event racing it.
    pub(crate) fn dispatch_gated(&self, gate: &Gate, action: impl Into<S::Action>) {
        self.enqueue(Pending {
            action: action.into(),
            gate: Some(Arc::clone(gate)),
        });
    }

    fn enqueue(&self, pending: Pending<S::Action>) {
        let current = thread::current().id();
        if *lock(&self.drainer) == Some(current) {
            lock(&self.queue).push_back(pending);
            return;
        }

        let _drain = lock(&self.drain);
        let _draining = Draining::begin(&self.drainer, current);
        lock(&self.queue).push_back(pending);
        loop {
            let next = lock(&self.queue).pop_front();
            let Some(pending) = next else { break };
            self.apply(pending);
        }
    }

    fn apply(&self, pending: Pending<S::Action>) {
        if let Some(gate) = &pending.gate {
            if !gate.load(Ordering::SeqCst) {
                tracing::trace!("Dropping action of a closed subscription");
                return;
            }
        }

        let version = {
            let mut state = lock(&self.state);
            if !Arc::make_mut(&mut state).reduce(pending.action) {
                return;
            }
            Arc::clone(&state)
        };

        let observers: Vec<Observer<S>> = self
            .observers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for observer in observers {
            observer(&version);
        }
    }
}

/// Marks the current thread as the drainer until dropped.
struct Draining<'a> {
    drainer: &'a Mutex<Option<ThreadId>>,
}

impl<'a> Draining<'a> {
    fn begin(drainer: &'a Mutex<Option<ThreadId>>, thread: ThreadId) -> Self {
        *lock(drainer) = Some(thread);
        Self { drainer }
    }
}

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        *lock(self.drainer) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_engine::Entry;
    use serde_json::json;

    fn replace(binding: &str, value: serde_json::Value) -> MirrorAction {
        MirrorAction::ValueReplaced {
            binding: binding.into(),
            entry: Some(Entry::new(binding, value)),
        }
    }

    #[test]
    fn observers_see_each_change_once() {
        let store = LocalStore::new(MirrorState::new(["a"]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(Arc::new(move |state: &Arc<MirrorState>| {
            sink.lock().unwrap().push(state.connected)
        }));

        store.dispatch(MirrorAction::Connected);
        store.dispatch(MirrorAction::Connected);
        store.dispatch(MirrorAction::Disconnected);

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn nested_dispatch_is_deferred() {
        let store = LocalStore::new(MirrorState::new(["a", "b"]));
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::clone(&store);
        let sink = Arc::clone(&order);
        store.subscribe(Arc::new(move |state: &Arc<MirrorState>| {
            let a = state.store("a").and_then(|e| e.as_value()).cloned();
            let b = state.store("b").and_then(|e| e.as_value()).cloned();
            sink.lock().unwrap().push((a.clone(), b));
            if a == Some(json!(1)) && state.store("b").is_none() {
                inner.dispatch(replace("b", json!(2)));
                // Not applied until this observer returns.
                assert!(inner.state().store("b").is_none());
            }
        }));

        store.dispatch(replace("a", json!(1)));

        assert_eq!(
            *order.lock().unwrap(),
            vec![(Some(json!(1)), None), (Some(json!(1)), Some(json!(2)))]
        );
    }

    #[test]
    fn old_versions_stay_immutable() {
        let store = LocalStore::new(MirrorState::default());
        let before = store.state();
        store.dispatch(MirrorAction::Connected);
        assert!(!before.connected);
        assert!(store.state().connected);
    }

    #[test]
    fn unsubscribed_observer_is_not_called() {
        let store = LocalStore::new(MirrorState::default());
        let id = store.subscribe(Arc::new(|_: &Arc<MirrorState>| panic!("removed")));
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.dispatch(MirrorAction::Connected);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn dispatch_from_another_thread_applies_before_returning() {
        let store = LocalStore::new(MirrorState::new(["a", "b"]));
        let (draining_tx, draining_rx) = std::sync::mpsc::channel();

        let signal = Mutex::new(Some(draining_tx));
        store.subscribe(Arc::new(move |state: &Arc<MirrorState>| {
            if state.store("b").is_none() {
                if let Some(tx) = signal.lock().unwrap().take() {
                    tx.send(()).unwrap();
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
            }
        }));

        let other = Arc::clone(&store);
        let writer = std::thread::spawn(move || {
            draining_rx.recv().unwrap();
            other.dispatch(replace("b", json!(2)));
            other.state().store("b").and_then(|e| e.as_value()).cloned()
        });

        store.dispatch(replace("a", json!(1)));
        assert_eq!(writer.join().unwrap(), Some(json!(2)));
    }

    #[test]
    fn gated_action_is_checked_when_applied() {
        let store = LocalStore::new(MirrorState::new(["a", "b"]));
        let gate: Gate = Arc::new(AtomicBool::new(true));

        let inner = Arc::clone(&store);
        let observed_gate = Arc::clone(&gate);
        let fired = AtomicBool::new(false);
        store.subscribe(Arc::new(move |state: &Arc<MirrorState>| {
            if state.store("a").is_some() && !fired.swap(true, Ordering::SeqCst) {
                // Queued while the gate is open, closed before its turn.
                inner.dispatch_gated(&observed_gate, replace("b", json!(2)));
                observed_gate.store(false, Ordering::SeqCst);
            }
        }));

        store.dispatch(replace("a", json!(1)));
        assert!(store.state().store("b").is_none());

        let open: Gate = Arc::new(AtomicBool::new(true));
        store.dispatch_gated(&open, replace("b", json!(3)));
        assert_eq!(store.state().store("b").and_then(|e| e.as_value()), Some(&json!(3)));
    }
}
