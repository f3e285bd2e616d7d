//! Request types for the node task

use serde_json::Value;
use tokio::sync::oneshot;

use crate::envelope::EventKind;
use crate::error::CrosslinkError;
use crate::events::{Handler, HandlerKey};
use crate::identity::ContextId;

/// Requests sent from handles to the node task
pub enum NodeRequest {
    /// Ship an envelope; destination `None` broadcasts to all contexts
    Broadcast {
        event: EventKind,
        data: Value,
        destination: Option<ContextId>,
        reply_tx: oneshot::Sender<Result<(), CrosslinkError>>,
    },

    /// Ship an envelope to whichever context is currently master
    BroadcastMaster {
        event: EventKind,
        data: Value,
        reply_tx: oneshot::Sender<Result<(), CrosslinkError>>,
    },

    /// Register a handler (replaces an existing registration with the same key)
    On {
        event: EventKind,
        key: Option<HandlerKey>,
        handler: Handler,
        reply_tx: oneshot::Sender<HandlerKey>,
    },

    /// Register a one-shot handler
    Once {
        event: EventKind,
        key: Option<HandlerKey>,
        handler: Handler,
        reply_tx: oneshot::Sender<HandlerKey>,
    },

    /// Remove one handler by key
    Off {
        event: EventKind,
        key: HandlerKey,
        reply_tx: oneshot::Sender<bool>,
    },

    /// Remove every handler for an event
    OffAll {
        event: EventKind,
        reply_tx: oneshot::Sender<bool>,
    },

    /// Remove every handler for every event
    Clear { reply_tx: oneshot::Sender<()> },

    /// Resolve once setup has completed (immediately if it already has)
    WhenReady { reply_tx: oneshot::Sender<()> },

    /// Current protocol state for introspection
    Snapshot { reply_tx: oneshot::Sender<NodeSnapshot> },

    /// The deferred bully announcement is due (internal)
    BullyFire,

    /// The bootstrap probe timed out (internal)
    ProbeTimeout { probe_seq: u64 },

    /// Stop the node
    Shutdown,
}

/// A point-in-time view of the node's protocol state
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub id: ContextId,
    pub supported: bool,
    pub setup_complete: bool,
    pub master_id: Option<ContextId>,
    pub is_master: bool,
    pub peers: Vec<ContextId>,
}
