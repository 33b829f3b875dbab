//! Mirror Sync demo.
//!
//! Seeds an in-memory remote, mirrors a counter and a todo list, applies a
//! few remote changes and prints the projected props after each one.

use std::sync::Arc;

use mirror_engine::{to_props, Binding, MirrorState, QueryDescriptor, STATUS_BINDING};
use mirror_sync::{LocalStore, MemoryRemote, RemoteStore, SyncOptions, SyncSession};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mirror_sync=debug,mirror_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let options = SyncOptions::from_env().unwrap_or_else(|err| {
        tracing::warn!("{}, using demo options", err);
        SyncOptions::new("mirror-demo", "demo-key")
    });

    let remote = MemoryRemote::with_data(json!({
        "counter": 5,
        "todos": {
            "t1": {"title": "Write docs", "rank": 2},
            "t2": {"title": "Ship it", "rank": 1}
        }
    }));

    let names = ["count", "todos"];
    let store = LocalStore::new(MirrorState::new(names));
    let session = SyncSession::builder(Arc::clone(&remote) as Arc<dyn RemoteStore>, store)
        .options(options)
        .binding(Binding::new("count", "counter"))
        .binding(
            Binding::array("todos", "todos")
                .with_query(QueryDescriptor::new().order_by_child("rank")),
        )
        .on_auth(|user| tracing::info!(uid = ?user.map(|u| &u.uid), "Auth state"))
        .start()?;

    let initialized = session.initialized();
    remote.set_connected(true);
    if !initialized.wait().await {
        return Err("session closed before initialization".into());
    }

    let print = |label: &str| {
        let state = session.state();
        let props = to_props(&state, names.into_iter().chain([STATUS_BINDING]));
        println!("{}: {}", label, serde_json::Value::Object(props));
    };
    print("initialized");

    remote.set_value("counter", json!(6))?;
    remote.push_value("todos", json!({"title": "Celebrate", "rank": 0}))?;
    remote.set_value("todos/t1/rank", json!(-1))?;
    print("after remote changes");

    session.set("counter", json!(10));
    print("after local write");

    session.unsubscribe_all();
    print("after unsubscribe");

    Ok(())
}
