//! Sync session.
//!
//! A session owns the binding registry and the live subscriptions. Every
//! local state change and every binding add/remove/update funnels into one
//! re-resolution routine:
//!
//! 1. Resolve all bindings against the current state
//! 2. Diff against the previous resolution (equal maps do nothing)
//! 3. Close unsubscribed and changed bindings, then open new and changed
//!    ones
//!
//! The routine never nests. A call made while a pass is running (typically
//! from a store observer reacting to the pass's own dispatches) marks the
//! session dirty and the running call loops until nothing is left.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mirror_engine::{
    resolve, AuthUser, Binding, BindingName, BindingRegistry, BindingUpdate, MirrorAction,
    MirrorState, Path, RemoteError, ResolvedBinding, ResolvedOptions, SubscriptionPlan,
};
use tokio::sync::watch;

use crate::config::{RemoteConfig, SyncOptions};
use crate::error::{Result, SyncError};
use crate::feed::{Feed, InitialFetch};
use crate::remote::{AuthCallback, CancelCallback, EventKind, ListenerId, RemoteStore};
use crate::store::{LocalStore, ObserverId, State};
use crate::subscription::{PopulatedListener, SubscriptionRegistry};

/// Called with the signed-in user after every auth state change.
pub type AuthHook = Arc<dyn Fn(Option<&AuthUser>) + Send + Sync>;

/// One-shot signal that fires once the mirror is connected and every
/// resolved binding has its first value.
#[derive(Debug, Clone)]
pub struct Initialized {
    rx: watch::Receiver<bool>,
}

impl Initialized {
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the signal. Returns false if the session went away first.
    pub async fn wait(mut self) -> bool {
        let ready = self.rx.wait_for(|ready| *ready).await.is_ok();
        ready
    }
}

struct Core<S> {
    registry: BindingRegistry<S>,
    resolved: ResolvedOptions,
    subscriptions: SubscriptionRegistry,
}

pub(crate) struct SessionInner<S: State> {
    pub(crate) remote: Arc<dyn RemoteStore>,
    pub(crate) store: Arc<LocalStore<S>>,
    options: SyncOptions,
    config: RemoteConfig,
    feed: Feed<S>,
    core: Mutex<Core<S>>,
    resolving: AtomicBool,
    dirty: AtomicBool,
    closed: AtomicBool,
    store_observer: Mutex<Option<ObserverId>>,
    remote_observers: Mutex<Vec<ListenerId>>,
    initialized: watch::Receiver<bool>,
    initialized_observer: Option<ObserverId>,
}

/// Handle to a running sync session.
///
/// Dropping the handle tears the session down like [`unsubscribe_all`].
///
/// [`unsubscribe_all`]: SyncSession::unsubscribe_all
pub struct SyncSession<S: State> {
    pub(crate) inner: Arc<SessionInner<S>>,
}

/// Builder for [`SyncSession`].
pub struct SessionBuilder<S: State> {
    remote: Arc<dyn RemoteStore>,
    store: Arc<LocalStore<S>>,
    options: SyncOptions,
    bindings: Vec<Binding<S>>,
    on_auth: Option<AuthHook>,
    on_cancel: Option<CancelCallback>,
}

impl<S: State> SessionBuilder<S> {
    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn binding(mut self, binding: Binding<S>) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn bindings(mut self, bindings: impl IntoIterator<Item = Binding<S>>) -> Self {
        self.bindings.extend(bindings);
        self
    }

    /// Hook called after every auth state change.
    pub fn on_auth<F>(mut self, hook: F) -> Self
    where
        F: Fn(Option<&AuthUser>) + Send + Sync + 'static,
    {
        self.on_auth = Some(Arc::new(hook));
        self
    }

    /// Hook called when the remote cancels any listener.
    pub fn on_cancel<F>(mut self, hook: F) -> Self
    where
        F: Fn(RemoteError) + Send + Sync + 'static,
    {
        self.on_cancel = Some(Arc::new(hook));
        self
    }

    /// Validate the configuration and start mirroring.
    ///
    /// Configuration and binding errors are returned before any listener is
    /// opened or any action dispatched.
    pub fn start(self) -> Result<SyncSession<S>> {
        let config = self.options.validate()?;

        let mut registry = BindingRegistry::new();
        for binding in self.bindings {
            registry.add(binding)?;
        }

        let (initialized, initialized_observer) = watch_initialized(&self.store);

        let inner = Arc::new(SessionInner {
            feed: Feed {
                remote: Arc::clone(&self.remote),
                store: Arc::clone(&self.store),
                initial: Arc::new(InitialFetch::default()),
                on_cancel: self.on_cancel,
            },
            remote: self.remote,
            store: self.store,
            options: self.options,
            config,
            core: Mutex::new(Core {
                registry,
                resolved: ResolvedOptions::new(),
                subscriptions: SubscriptionRegistry::new(),
            }),
            resolving: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            store_observer: Mutex::new(None),
            remote_observers: Mutex::new(Vec::new()),
            initialized,
            initialized_observer,
        });

        inner.begin(self.on_auth);
        Ok(SyncSession { inner })
    }
}

/// Register the one-shot observer behind [`Initialized`].
///
/// The observer removes itself once it fires.
fn watch_initialized<S: State>(
    store: &Arc<LocalStore<S>>,
) -> (watch::Receiver<bool>, Option<ObserverId>) {
    let is_ready = |mirror: &MirrorState| mirror.connected && mirror.initial_fetch_done;

    let (tx, rx) = watch::channel(false);
    if is_ready(store.state().mirror()) {
        tx.send_replace(true);
        return (rx, None);
    }

    let own_id = Arc::new(AtomicU64::new(0));
    let cell = Arc::clone(&own_id);
    let weak = Arc::downgrade(store);
    let id = store.subscribe(Arc::new(move |state: &Arc<S>| {
        if *tx.borrow() || !is_ready(state.mirror()) {
            return;
        }
        tx.send_replace(true);
        tracing::info!("Session initialized");
        if let Some(store) = weak.upgrade() {
            store.unsubscribe(cell.load(Ordering::SeqCst));
        }
    }));
    own_id.store(id, Ordering::SeqCst);
    (rx, Some(id))
}

impl<S: State> SyncSession<S> {
    pub fn builder(remote: Arc<dyn RemoteStore>, store: Arc<LocalStore<S>>) -> SessionBuilder<S> {
        SessionBuilder {
            remote,
            store,
            options: SyncOptions::default(),
            bindings: Vec::new(),
            on_auth: None,
            on_cancel: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<LocalStore<S>> {
        &self.inner.store
    }

    /// Current state version.
    pub fn state(&self) -> Arc<S> {
        self.inner.store.state()
    }

    pub fn initialized(&self) -> Initialized {
        Initialized {
            rx: self.inner.initialized.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Re-run resolution against the current state.
    ///
    /// Called automatically after every state change.
    pub fn update_subscriptions(&self) {
        self.inner.update_subscriptions();
    }

    /// Declare a new binding and subscribe it if it resolves.
    pub fn add_binding(&self, binding: Binding<S>) -> Result<()> {
        self.inner.ensure_open()?;
        tracing::debug!(binding = %binding.name, "Adding binding");
        self.inner.core().registry.add(binding)?;
        self.inner.update_subscriptions();
        Ok(())
    }

    /// Remove a binding, closing its subscription.
    pub fn remove_binding(&self, name: &str) -> Result<()> {
        self.inner.ensure_open()?;
        tracing::debug!(binding = %name, "Removing binding");
        self.inner.core().registry.remove(name)?;
        self.inner.update_subscriptions();
        Ok(())
    }

    /// Merge a partial descriptor into a binding. A changed path or query
    /// reopens its subscription.
    pub fn update_binding(&self, update: BindingUpdate<S>) -> Result<()> {
        self.inner.ensure_open()?;
        tracing::debug!(binding = %update.name, "Updating binding");
        self.inner.core().registry.update(update)?;
        self.inner.update_subscriptions();
        Ok(())
    }

    /// Close every subscription in declaration order and detach from the
    /// store and the remote. Idempotent.
    pub fn unsubscribe_all(&self) {
        self.inner.shutdown();
    }

    /// Declared binding names in declaration order.
    pub fn bindings(&self) -> Vec<BindingName> {
        self.inner.core().registry.names()
    }

    /// Latest resolution of every binding.
    pub fn resolved(&self) -> ResolvedOptions {
        self.inner.core().resolved.clone()
    }

    pub fn resolved_binding(&self, name: &str) -> Option<ResolvedBinding> {
        self.inner.core().resolved.get(name).cloned()
    }

    /// Subscribed path per binding.
    pub fn refs(&self) -> BTreeMap<BindingName, Path> {
        self.inner.core().subscriptions.refs()
    }

    /// Live listener ids per binding.
    pub fn listeners(&self) -> BTreeMap<BindingName, BTreeMap<EventKind, ListenerId>> {
        self.inner.core().subscriptions.listeners()
    }

    /// Populated child listeners per binding.
    pub fn populated(&self) -> BTreeMap<BindingName, BTreeMap<String, PopulatedListener>> {
        self.inner.core().subscriptions.populated()
    }
}

impl<S: State> Drop for SyncSession<S> {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl<S: State> SessionInner<S> {
    fn core(&self) -> MutexGuard<'_, Core<S>> {
        lock(&self.core)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Closed);
        }
        Ok(())
    }

    /// Seed the mirror, attach observers and run the first pass.
    fn begin(self: &Arc<Self>, on_auth: Option<AuthHook>) {
        tracing::info!(name = %self.options.name, database = %self.config.database_url, "Starting sync session");

        self.store.dispatch(MirrorAction::ConfigUpdated {
            name: self.options.name.clone(),
        });

        // Bindings that start unresolved have nothing to wait for.
        let unresolved: Vec<BindingName> = {
            let state = self.store.state();
            let core = self.core();
            resolve(&core.registry, &*state)
                .into_iter()
                .filter(|(_, resolved)| !resolved.is_resolved())
                .map(|(name, _)| name)
                .collect()
        };
        for binding in unresolved {
            self.store.dispatch(MirrorAction::InitialValueReceived { binding });
        }

        let connected = {
            let store = Arc::clone(&self.store);
            self.remote.on_connected(Arc::new(move |connected: bool| {
                tracing::debug!(connected, "Connectivity changed");
                store.dispatch(if connected {
                    MirrorAction::Connected
                } else {
                    MirrorAction::Disconnected
                });
            }))
        };
        let auth = {
            let store = Arc::clone(&self.store);
            let callback: AuthCallback = Arc::new(move |user: Option<AuthUser>| {
                match &user {
                    Some(user) => {
                        tracing::debug!(uid = %user.uid, "User authenticated");
                        store.dispatch(MirrorAction::UserAuthenticated { user: user.clone() });
                    }
                    None => store.dispatch(MirrorAction::UserUnauthenticated),
                }
                if let Some(hook) = &on_auth {
                    hook(user.as_ref());
                }
            });
            self.remote.on_auth_state(callback)
        };
        lock(&self.remote_observers).extend([connected, auth]);

        let weak: Weak<Self> = Arc::downgrade(self);
        let observer = self.store.subscribe(Arc::new(move |_: &Arc<S>| {
            if let Some(inner) = weak.upgrade() {
                inner.update_subscriptions();
            }
        }));
        *lock(&self.store_observer) = Some(observer);

        self.update_subscriptions();

        if self.feed.initial.finish_if_idle() {
            tracing::info!("No resolved bindings, initial fetch done");
            self.store.dispatch(MirrorAction::InitialFetchDone);
        }
    }

    fn update_subscriptions(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        loop {
            if self
                .resolving
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            while self.dirty.swap(false, Ordering::SeqCst) {
                self.pass();
            }
            self.resolving.store(false, Ordering::SeqCst);

            if !self.dirty.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// One resolve, diff and apply cycle.
    fn pass(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let state = self.store.state();
        let (plan, next) = {
            let mut core = self.core();
            let next = resolve(&core.registry, &*state);
            let plan = SubscriptionPlan::diff(&core.resolved, &next);
            core.resolved = next.clone();
            (plan, next)
        };
        if plan.is_empty() {
            return;
        }

        tracing::debug!(
            unsubscribe = ?plan.unsubscribe,
            subscribe = ?plan.subscribe,
            resubscribe = ?plan.resubscribe,
            "Applying subscription plan"
        );

        for name in plan.subscribe.iter().chain(&plan.resubscribe) {
            self.feed.initial.expect(name);
        }
        for name in &plan.unsubscribe {
            self.close_binding(name, true);
        }
        for name in &plan.resubscribe {
            self.close_binding(name, false);
        }
        for name in plan.subscribe.iter().chain(&plan.resubscribe) {
            self.open_binding(name, &next[name]);
        }
    }

    fn open_binding(&self, name: &str, resolved: &ResolvedBinding) {
        let Some(subscription) = self.feed.open(name, resolved) else {
            return;
        };

        let leftover = {
            let mut core = self.core();
            if self.closed.load(Ordering::SeqCst) {
                Some(subscription)
            } else {
                core.subscriptions.add(subscription)
            }
        };
        if let Some(leftover) = leftover {
            leftover.close(&*self.remote);
        }
    }

    fn close_binding(&self, name: &str, forget: bool) {
        let subscription = self.core().subscriptions.remove(name);
        if let Some(subscription) = subscription {
            subscription.close(&*self.remote);
        }

        self.store.dispatch(MirrorAction::ValueReplaced {
            binding: name.to_string(),
            entry: None,
        });

        if forget && self.feed.initial.forget(name) {
            tracing::info!("Initial fetch done");
            self.store.dispatch(MirrorAction::InitialFetchDone);
        }
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(name = %self.options.name, "Closing sync session");

        if let Some(id) = lock(&self.store_observer).take() {
            self.store.unsubscribe(id);
        }
        // Drops the signal's sender if it never fired.
        if let Some(id) = self.initialized_observer {
            self.store.unsubscribe(id);
        }
        let observers = std::mem::take(&mut *lock(&self.remote_observers));
        for id in observers {
            self.remote.unsubscribe(id);
        }

        let (names, mut subscriptions) = {
            let mut core = self.core();
            core.resolved.clear();
            (core.registry.names(), std::mem::take(&mut core.subscriptions))
        };
        for name in names {
            if let Some(subscription) = subscriptions.remove(&name) {
                subscription.close(&*self.remote);
                self.store.dispatch(MirrorAction::ValueReplaced {
                    binding: name,
                    entry: None,
                });
            }
        }
        for subscription in subscriptions.drain() {
            subscription.close(&*self.remote);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
