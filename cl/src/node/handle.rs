//! Cloneable handle for talking to a running node

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::envelope::EventKind;
use crate::error::CrosslinkError;
use crate::events::{Handler, HandlerKey};
use crate::identity::ContextId;

use super::messages::{NodeRequest, NodeSnapshot};

/// Handle to a running [`Node`](super::Node)
///
/// Cheap to clone; every clone talks to the same node task. All methods
/// return [`CrosslinkError::ChannelClosed`] once the node has shut down.
#[derive(Clone)]
pub struct CrosslinkHandle {
    tx: mpsc::Sender<NodeRequest>,
    self_id: ContextId,
}

impl CrosslinkHandle {
    pub(crate) fn new(tx: mpsc::Sender<NodeRequest>, self_id: ContextId) -> Self {
        Self { tx, self_id }
    }

    /// This context's id
    pub fn id(&self) -> &ContextId {
        &self.self_id
    }

    /// Broadcast an event to every context, this one included
    pub async fn broadcast(&self, event: EventKind, data: Value) -> Result<(), CrosslinkError> {
        self.broadcast_to(event, data, None).await
    }

    /// Send an event to one context; `None` broadcasts
    pub async fn broadcast_to(
        &self,
        event: EventKind,
        data: Value,
        destination: Option<ContextId>,
    ) -> Result<(), CrosslinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(NodeRequest::Broadcast {
            event,
            data,
            destination,
            reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| CrosslinkError::ChannelClosed)?
    }

    /// Send an event to whichever context is currently master
    ///
    /// Fails with [`CrosslinkError::NoMaster`] when no master is known yet.
    pub async fn broadcast_to_master(&self, event: EventKind, data: Value) -> Result<(), CrosslinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(NodeRequest::BroadcastMaster { event, data, reply_tx }).await?;
        reply_rx.await.map_err(|_| CrosslinkError::ChannelClosed)?
    }

    /// Subscribe to an event; returns the key for later removal
    pub async fn on<F>(&self, event: EventKind, handler: F) -> Result<HandlerKey, CrosslinkError>
    where
        F: FnMut(&crate::envelope::Envelope) + Send + 'static,
    {
        self.register(event, None, Box::new(handler), false).await
    }

    /// Subscribe under an explicit key, replacing any handler with that key
    pub async fn on_keyed<F>(
        &self,
        event: EventKind,
        key: impl Into<HandlerKey>,
        handler: F,
    ) -> Result<HandlerKey, CrosslinkError>
    where
        F: FnMut(&crate::envelope::Envelope) + Send + 'static,
    {
        self.register(event, Some(key.into()), Box::new(handler), false).await
    }

    /// Subscribe for a single delivery
    pub async fn once<F>(&self, event: EventKind, handler: F) -> Result<HandlerKey, CrosslinkError>
    where
        F: FnMut(&crate::envelope::Envelope) + Send + 'static,
    {
        self.register(event, None, Box::new(handler), true).await
    }

    async fn register(
        &self,
        event: EventKind,
        key: Option<HandlerKey>,
        handler: Handler,
        once: bool,
    ) -> Result<HandlerKey, CrosslinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = if once {
            NodeRequest::Once {
                event,
                key,
                handler,
                reply_tx,
            }
        } else {
            NodeRequest::On {
                event,
                key,
                handler,
                reply_tx,
            }
        };
        self.send(request).await?;
        reply_rx.await.map_err(|_| CrosslinkError::ChannelClosed)
    }

    /// Remove one handler by key; returns whether anything was removed
    pub async fn off(&self, event: EventKind, key: HandlerKey) -> Result<bool, CrosslinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(NodeRequest::Off { event, key, reply_tx }).await?;
        reply_rx.await.map_err(|_| CrosslinkError::ChannelClosed)
    }

    /// Remove every handler for an event
    pub async fn off_all(&self, event: EventKind) -> Result<bool, CrosslinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(NodeRequest::OffAll { event, reply_tx }).await?;
        reply_rx.await.map_err(|_| CrosslinkError::ChannelClosed)
    }

    /// Remove every handler for every event
    pub async fn clear(&self) -> Result<(), CrosslinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(NodeRequest::Clear { reply_tx }).await?;
        reply_rx.await.map_err(|_| CrosslinkError::ChannelClosed)
    }

    /// Resolve once setup has completed (immediately if it already has)
    pub async fn when_ready(&self) -> Result<(), CrosslinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(NodeRequest::WhenReady { reply_tx }).await?;
        reply_rx.await.map_err(|_| CrosslinkError::ChannelClosed)
    }

    /// A point-in-time view of the node's protocol state
    pub async fn snapshot(&self) -> Result<NodeSnapshot, CrosslinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(NodeRequest::Snapshot { reply_tx }).await?;
        reply_rx.await.map_err(|_| CrosslinkError::ChannelClosed)
    }

    /// Whether the coordination channel is usable
    pub async fn supported(&self) -> Result<bool, CrosslinkError> {
        Ok(self.snapshot().await?.supported)
    }

    /// Whether this context is currently master
    pub async fn is_master(&self) -> Result<bool, CrosslinkError> {
        Ok(self.snapshot().await?.is_master)
    }

    /// Ask the node to shut down cleanly
    pub async fn shutdown(&self) -> Result<(), CrosslinkError> {
        self.send(NodeRequest::Shutdown).await
    }

    async fn send(&self, request: NodeRequest) -> Result<(), CrosslinkError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| CrosslinkError::ChannelClosed)
    }
}
