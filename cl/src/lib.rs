//! Crosslink - cooperating-context coordination over a shared store
//!
//! Crosslink lets independent contexts sharing one key-value store (with
//! change notifications) coordinate: they discover each other through
//! heartbeats, elect exactly one master, and exchange messages without any
//! central broker. The store is the only communication channel.
//!
//! # Core Concepts
//!
//! - **One id per context**: minted at startup, ordered so the lexically
//!   lowest id wins elections
//! - **Heartbeat liveness**: every context announces itself on a fixed
//!   period; silence past the window means gone
//! - **Single master**: election races collapse deterministically, and
//!   promotion/demotion are observable local events
//! - **Fail fast when unsupported**: a store without working change
//!   notifications (or a frozen environment) makes every broadcast error
//!   with the full list of reasons
//!
//! # Modules
//!
//! - [`node`] - the node task and its cloneable handle
//! - [`bus`] - message transport over the shared store
//! - [`election`] - the master election state machine
//! - [`registry`] - peer liveness bookkeeping
//! - [`envelope`] - wire model: envelopes, persisted values, keys
//! - [`events`] - keyed local event dispatch

pub mod bus;
pub mod config;
pub mod election;
pub mod envelope;
pub mod error;
pub mod events;
pub mod identity;
pub mod keepalive;
pub mod node;
pub mod registry;
pub mod support;

// Re-export commonly used types
pub use config::CrosslinkConfig;
pub use envelope::{Envelope, EventKind, StoreKey, StoredValue};
pub use error::{CrosslinkError, UnsupportedReason};
pub use events::HandlerKey;
pub use identity::ContextId;
pub use node::{CrosslinkHandle, Node, NodeSnapshot};
pub use registry::{PeerRecord, Registry};
