//! # Mirror Engine
//!
//! The deterministic core of a local mirror of a remote hierarchical store.
//!
//! A mirror keeps a set of named *bindings* current. Each binding resolves,
//! from the local state, to a remote path (or to nothing), and is mirrored
//! either as a whole value or as an ordered list of children. This crate
//! holds the logic that needs no IO:
//!
//! - **Resolution**: evaluate every binding's [`PathSpec`] against a state
//!   snapshot ([`resolve`])
//! - **Diffing**: compute the minimal subscribe / unsubscribe / resubscribe
//!   transitions between two resolutions ([`SubscriptionPlan`])
//! - **Reconciliation**: apply sibling-relative child events to an
//!   [`OrderedCollection`] without re-sorting ([`ChildChange`])
//! - **Projection**: the [`MirrorState`] reducer and the props view
//!   ([`projection::to_props`])
//!
//! ## Design Principles
//!
//! - **No IO**: remote listeners, local store notification and timers live
//!   in the integration crate
//! - **Deterministic**: the same action sequence always yields the same mirror
//! - **Order from the remote**: list order comes only from the history of
//!   insert/move positions, never from local sorting
//!
//! ## Quick Start
//!
//! ```rust
//! use mirror_engine::{Binding, BindingRegistry, MirrorAction, MirrorState, PathSpec, resolve};
//! use serde_json::json;
//!
//! struct App {
//!     user_id: Option<String>,
//! }
//!
//! let registry = BindingRegistry::new()
//!     .with_binding(Binding::array("posts", "posts"))
//!     .unwrap()
//!     .with_binding(Binding::object(
//!         "profile",
//!         PathSpec::computed(|app: &App| app.user_id.as_ref().map(|id| format!("users/{}", id))),
//!     ))
//!     .unwrap();
//!
//! let options = resolve(&registry, &App { user_id: None });
//! assert_eq!(options["posts"].path.as_deref(), Some("posts"));
//! assert_eq!(options["profile"].path, None);
//!
//! let mut mirror = MirrorState::new(registry.names());
//! mirror.apply(MirrorAction::ArrayUpdated {
//!     binding: "posts".into(),
//!     key: "posts".into(),
//!     items: vec![],
//! });
//! mirror.apply(MirrorAction::ArrayChildAdded {
//!     binding: "posts".into(),
//!     key: "first".into(),
//!     value: json!({"title": "Hello"}),
//!     previous_key: None,
//! });
//! assert_eq!(mirror.list("posts").unwrap().keys(), vec!["first"]);
//! ```

pub mod binding;
pub mod collection;
pub mod entry;
pub mod error;
pub mod mirror;
pub mod projection;
pub mod query;
pub mod reconcile;
pub mod resolver;
pub mod status;
pub mod writes;

// Re-export main types at crate root
pub use binding::{
    normalize_path, path_key, Binding, BindingRegistry, BindingUpdate, CollectionType, PathFn,
    PathSpec,
};
pub use collection::OrderedCollection;
pub use entry::{Entry, StoreEntry};
pub use error::Error;
pub use mirror::{MirrorAction, MirrorState};
pub use projection::{to_props, StatusView};
pub use query::{OrderBy, QueryClause, QueryDescriptor};
pub use reconcile::{apply_all, ChildChange};
pub use resolver::{resolve, resolved_names, ResolvedBinding, ResolvedOptions, SubscriptionPlan};
pub use status::{
    AuthSlot, AuthUser, ErrorSlot, ErrorSlots, FlagSlots, RemoteError, RemoteErrorCode,
};
pub use writes::{WriteError, WriteTracker};

/// Type aliases for clarity
pub type BindingName = String;
pub type Path = String;
pub type ChildKey = String;
pub type WriteId = String;
pub type Timestamp = u64;

/// Reserved pseudo-binding exposing session status in projections.
pub const STATUS_BINDING: &str = "_status";
