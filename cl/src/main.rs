//! Crosslink demo
//!
//! Runs a handful of nodes over one in-memory store, lets them elect a
//! master, exchanges a couple of messages, and shuts down cleanly. Useful
//! for watching the protocol converge with `RUST_LOG=crosslink=debug`.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use serde_json::json;
use sharedstore::MemoryStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crosslink::{CrosslinkConfig, EventKind, Node};

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let store = MemoryStore::new();
    let mut handles = Vec::new();
    let mut tasks = Vec::new();

    // Scaled-down timings so the demo converges quickly
    let config = CrosslinkConfig {
        heartbeat_interval_ms: 250,
        peer_timeout_ms: 1_000,
        ping_timeout_ms: 100,
        ..Default::default()
    };

    for _ in 0..3 {
        let node = Node::new(Arc::new(store.handle()), config.clone());
        handles.push(node.handle());
        tasks.push(tokio::spawn(node.run()));
    }

    for handle in &handles {
        handle.when_ready().await?;
    }

    for handle in &handles {
        let id = handle.id().clone();
        handle
            .on(EventKind::user("greeting"), move |envelope| {
                info!(to = %id, from = %envelope.origin, data = %envelope.data, "greeting received");
            })
            .await?;
    }

    let snapshot = handles[0].snapshot().await?;
    info!(master = ?snapshot.master_id, peers = snapshot.peers.len(), "converged");

    handles[0].broadcast(EventKind::user("greeting"), json!("hello, peers")).await?;
    handles[1]
        .broadcast_to_master(EventKind::user("greeting"), json!("hello, master"))
        .await?;

    // Let the messages fan out before tearing down
    tokio::time::sleep(Duration::from_millis(200)).await;

    for handle in &handles {
        handle.shutdown().await?;
    }
    for task in tasks {
        task.await?;
    }

    Ok(())
}
