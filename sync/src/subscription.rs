//! Live subscriptions, one per resolved binding.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use mirror_engine::{BindingName, CollectionType, Path, QueryDescriptor};
use serde::Serialize;

use crate::feed::Populated;
use crate::remote::{EventKind, ListenerId, RemoteStore};
use crate::store::Gate;

/// Event kinds whose listener the remote has cancelled.
pub(crate) type Revoked = Arc<Mutex<BTreeSet<EventKind>>>;

/// A secondary listener on a location referenced by a parent field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopulatedListener {
    pub path: Path,
    pub listener: ListenerId,
}

/// The remote listeners mirroring one binding.
pub struct Subscription {
    binding: BindingName,
    path: Path,
    query: QueryDescriptor,
    collection_type: CollectionType,
    listeners: BTreeMap<EventKind, ListenerId>,
    populated: Option<Arc<Populated>>,
    open: Gate,
    revoked: Revoked,
}

impl Subscription {
    pub(crate) fn new(
        binding: BindingName,
        path: Path,
        query: QueryDescriptor,
        collection_type: CollectionType,
        open: Gate,
    ) -> Self {
        Self {
            binding,
            path,
            query,
            collection_type,
            listeners: BTreeMap::new(),
            populated: None,
            open,
            revoked: Revoked::default(),
        }
    }

    pub(crate) fn add_listener(&mut self, kind: EventKind, id: ListenerId) {
        self.listeners.insert(kind, id);
    }

    pub(crate) fn set_populated(&mut self, populated: Arc<Populated>) {
        self.populated = Some(populated);
    }

    /// Shared set the feed's cancel handlers record into.
    pub(crate) fn revocations(&self) -> Revoked {
        Arc::clone(&self.revoked)
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &QueryDescriptor {
        &self.query
    }

    pub fn collection_type(&self) -> CollectionType {
        self.collection_type
    }

    /// Listener ids still held, keyed by event kind. Listeners the remote
    /// cancelled are left out.
    pub fn listeners(&self) -> BTreeMap<EventKind, ListenerId> {
        let revoked = lock(&self.revoked);
        self.listeners
            .iter()
            .filter(|(kind, _)| !revoked.contains(*kind))
            .map(|(kind, id)| (*kind, *id))
            .collect()
    }

    /// Populated child listeners keyed by field name.
    pub fn populated(&self) -> BTreeMap<String, PopulatedListener> {
        self.populated
            .as_ref()
            .map(|populated| populated.listeners())
            .unwrap_or_default()
    }

    /// Detach every listener of this subscription.
    ///
    /// Actions of events already in flight are dropped by the store once
    /// this returns.
    pub(crate) fn close(self, remote: &dyn RemoteStore) {
        self.open.store(false, Ordering::SeqCst);
        for (kind, id) in &self.listeners {
            tracing::trace!(binding = %self.binding, kind = %kind, listener = id, "Detaching listener");
            remote.unsubscribe(*id);
        }
        if let Some(populated) = &self.populated {
            populated.close(remote);
        }
        tracing::debug!(binding = %self.binding, path = %self.path, "Subscription closed");
    }
}

/// Live subscriptions keyed by binding name.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: BTreeMap<BindingName, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription, returning the one it replaces.
    pub fn add(&mut self, subscription: Subscription) -> Option<Subscription> {
        self.subscriptions
            .insert(subscription.binding.clone(), subscription)
    }

    pub fn remove(&mut self, binding: &str) -> Option<Subscription> {
        self.subscriptions.remove(binding)
    }

    /// Take every subscription out of the registry.
    pub fn drain(&mut self) -> Vec<Subscription> {
        std::mem::take(&mut self.subscriptions).into_values().collect()
    }

    pub fn get(&self, binding: &str) -> Option<&Subscription> {
        self.subscriptions.get(binding)
    }

    pub fn contains(&self, binding: &str) -> bool {
        self.subscriptions.contains_key(binding)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.values()
    }

    /// Subscribed path of every binding.
    pub fn refs(&self) -> BTreeMap<BindingName, Path> {
        self.subscriptions
            .iter()
            .map(|(name, sub)| (name.clone(), sub.path.clone()))
            .collect()
    }

    /// Listener ids of every binding.
    pub fn listeners(&self) -> BTreeMap<BindingName, BTreeMap<EventKind, ListenerId>> {
        self.subscriptions
            .iter()
            .map(|(name, sub)| (name.clone(), sub.listeners()))
            .collect()
    }

    /// Populated listeners of every binding that has any.
    pub fn populated(&self) -> BTreeMap<BindingName, BTreeMap<String, PopulatedListener>> {
        self.subscriptions
            .iter()
            .map(|(name, sub)| (name.clone(), sub.populated()))
            .filter(|(_, populated)| !populated.is_empty())
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    fn subscription(name: &str, path: &str, open: &Gate) -> Subscription {
        Subscription::new(
            name.into(),
            path.into(),
            QueryDescriptor::new(),
            CollectionType::Scalar,
            Arc::clone(open),
        )
    }

    #[test]
    fn registry_lookup_and_replace() {
        let open = Arc::new(AtomicBool::new(true));
        let mut registry = SubscriptionRegistry::new();

        assert!(registry.add(subscription("a", "x", &open)).is_none());
        assert!(registry.add(subscription("b", "y", &open)).is_none());
        let replaced = registry.add(subscription("a", "z", &open));

        assert_eq!(replaced.map(|s| s.path), Some("x".to_string()));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("a").map(Subscription::path), Some("z"));
        assert_eq!(registry.refs().into_values().collect::<Vec<_>>(), vec!["z", "y"]);

        assert!(registry.remove("b").is_some());
        assert!(!registry.contains("b"));
    }

    #[test]
    fn close_detaches_every_listener() {
        let remote = MemoryRemote::with_data(json!({"items": {"a": 1}}));
        let open = Arc::new(AtomicBool::new(true));
        let mut sub = subscription("items", "items", &open);

        for kind in EventKind::CHILD_KINDS {
            let id = remote.subscribe_child(
                "items",
                &QueryDescriptor::new(),
                kind,
                Arc::new(|_| {}),
                Arc::new(|_| {}),
            );
            sub.add_listener(kind, id);
        }
        assert_eq!(remote.listener_count(), 4);
        assert_eq!(sub.listeners().len(), 4);

        sub.close(&*remote);
        assert_eq!(remote.listener_count(), 0);
        assert!(!open.load(Ordering::SeqCst));
    }

    #[test]
    fn revoked_listeners_are_not_reported() {
        let open: Gate = Arc::new(AtomicBool::new(true));
        let mut sub = subscription("a", "x", &open);
        sub.add_listener(EventKind::Value, 7);
        sub.add_listener(EventKind::ChildAdded, 8);

        sub.revocations().lock().unwrap().insert(EventKind::Value);

        let mut registry = SubscriptionRegistry::new();
        registry.add(sub);
        assert_eq!(
            registry.listeners()["a"],
            BTreeMap::from([(EventKind::ChildAdded, 8)])
        );
    }
}
