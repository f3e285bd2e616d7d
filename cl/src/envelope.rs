//! Wire model: envelopes, persisted values, and coordination keys

use serde::{Deserialize, Serialize};

use crate::identity::ContextId;

/// The kinds of events that flow through the bus
///
/// Protocol events are closed variants; application events travel as
/// [`EventKind::User`] with their own name. `BecomeMaster`, `Demoted` and
/// `SetupComplete` never cross the store - they are emitted locally only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Heartbeat,
    PeerClosed,
    Promoted,
    Ping,
    Pong,
    BecomeMaster,
    Demoted,
    SetupComplete,
    #[serde(untagged)]
    User(String),
}

impl EventKind {
    /// Application event with the given name
    pub fn user(name: impl Into<String>) -> Self {
        EventKind::User(name.into())
    }
}

/// A single coordination message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message id, minted the same way as a [`ContextId`]
    pub id: ContextId,
    pub event: EventKind,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Absent means broadcast to all contexts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ContextId>,
    pub origin: ContextId,
    /// Creation time, wall-clock milliseconds
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(
        event: EventKind,
        data: serde_json::Value,
        destination: Option<ContextId>,
        origin: ContextId,
        timestamp: i64,
    ) -> Self {
        Self {
            id: ContextId::generate(),
            event,
            data,
            destination,
            origin,
            timestamp,
        }
    }

    /// Synthetic envelope for locally-emitted events that never cross the store
    pub fn local(event: EventKind, data: serde_json::Value, origin: ContextId, timestamp: i64) -> Self {
        let destination = Some(origin.clone());
        Self::new(event, data, destination, origin, timestamp)
    }

    /// True when this envelope should be handed to local subscribers of `me`
    pub fn addressed_to(&self, me: &ContextId) -> bool {
        match &self.destination {
            None => true,
            Some(dest) => dest == me,
        }
    }
}

/// Wrapper around every persisted value
///
/// Receivers use `origin` to filter self-echoes and `timestamp` to age out
/// stale cached verdicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub origin: ContextId,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: i64,
}

impl StoredValue {
    pub fn new(origin: ContextId, data: serde_json::Value, timestamp: i64) -> Self {
        Self {
            origin,
            data,
            timestamp,
        }
    }

    /// Decode a raw persisted value
    ///
    /// Malformed payloads and payloads without a recognizable origin tag
    /// yield `None`; one corrupt write must never crash peer contexts.
    pub fn decode(raw: &str) -> Option<StoredValue> {
        #[derive(Deserialize)]
        struct Raw {
            origin: Option<ContextId>,
            #[serde(default)]
            data: serde_json::Value,
            timestamp: Option<i64>,
        }

        let raw: Raw = serde_json::from_str(raw).unwrap_or(Raw {
            origin: None,
            data: serde_json::Value::Null,
            timestamp: None,
        });

        Some(StoredValue {
            origin: raw.origin?,
            data: raw.data,
            timestamp: raw.timestamp.unwrap_or(0),
        })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// True once this value is older than `ttl_ms` relative to `now_ms`
    pub fn is_expired(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.timestamp > ttl_ms
    }
}

/// The reserved coordination keys in the shared store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKey {
    /// Last envelope written (the message-exchange slot)
    Message,
    /// Full registry snapshot, persisted by the master only
    Registry,
    /// Cached supported/unsupported verdict
    Supported,
    /// Cached frozen-environment verdict
    Frozen,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Message => "crosslink.MESSAGE",
            StoreKey::Registry => "crosslink.REGISTRY",
            StoreKey::Supported => "crosslink.SUPPORTED",
            StoreKey::Frozen => "crosslink.FROZEN",
        }
    }

    /// Map a store key name back to the coordination key it names
    pub fn parse(key: &str) -> Option<StoreKey> {
        match key {
            "crosslink.MESSAGE" => Some(StoreKey::Message),
            "crosslink.REGISTRY" => Some(StoreKey::Registry),
            "crosslink.SUPPORTED" => Some(StoreKey::Supported),
            "crosslink.FROZEN" => Some(StoreKey::Frozen),
            _ => None,
        }
    }
}
