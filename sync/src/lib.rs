//! Mirror Sync - keeps a local mirror of a remote hierarchical store.
//!
//! A [`SyncSession`] watches a [`LocalStore`] holding application state that
//! embeds a [`MirrorState`]. After every state change it re-resolves the
//! declared bindings, opens and closes remote listeners through a
//! [`RemoteStore`], and dispatches the resulting events back into the store.
//!
//! ```
//! use mirror_engine::{Binding, MirrorState};
//! use mirror_sync::{LocalStore, MemoryRemote, SyncOptions, SyncSession};
//! use serde_json::json;
//!
//! let remote = MemoryRemote::with_data(json!({"counter": 5}));
//! remote.set_connected(true);
//!
//! let store = LocalStore::new(MirrorState::new(["count"]));
//! let session = SyncSession::builder(remote, store)
//!     .options(SyncOptions::new("demo", "key"))
//!     .binding(Binding::new("count", "counter"))
//!     .start()
//!     .unwrap();
//!
//! let props = mirror_engine::to_props(session.state().as_ref(), ["count"]);
//! assert_eq!(props["count"], json!({"key": "counter", "value": 5}));
//! assert!(session.initialized().is_ready());
//! ```
//!
//! [`MirrorState`]: mirror_engine::MirrorState

mod actions;
pub mod config;
pub mod error;
mod feed;
pub mod remote;
pub mod session;
pub mod store;
pub mod subscription;

pub use config::{ConfigError, RemoteConfig, SyncOptions};
pub use error::{Result, SyncError};
pub use remote::{MemoryRemote, RemoteStore, WriteRequest};
pub use session::{AuthHook, Initialized, SessionBuilder, SyncSession};
pub use store::{LocalStore, ObserverId, State};
pub use subscription::{PopulatedListener, Subscription, SubscriptionRegistry};
