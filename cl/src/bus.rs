//! Message transport over the shared store
//!
//! Outbound: envelopes are wrapped in a [`StoredValue`] and written to the
//! message key, except that a message addressed to ourselves never round
//! trips through storage. Inbound: raw change notifications are filtered
//! down to envelopes worth dispatching - coordination keys only, malformed
//! payloads treated as empty, self-echoes dropped, and exact repeats of
//! the immediately-preceding notification dropped to mask the
//! duplicate-delivery defect some notification channels have.

use std::sync::Arc;

use sharedstore::{ChangeEvent, SharedStore};
use tracing::{debug, warn};

use crate::envelope::{Envelope, EventKind, StoreKey, StoredValue};
use crate::error::CrosslinkError;
use crate::identity::{ContextId, now_ms};
use crate::support::SupportState;

/// A surviving inbound notification, decoded
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// An envelope addressed to this context (or broadcast)
    Message(Envelope),
    /// A peer wrote a frozen-environment verdict
    FrozenVerdict(bool),
    /// A peer wrote a supported verdict
    SupportedVerdict(bool),
}

pub struct MessageBus {
    store: Arc<dyn SharedStore>,
    self_id: ContextId,
    last_new: Option<String>,
    last_old: Option<String>,
}

impl MessageBus {
    pub fn new(store: Arc<dyn SharedStore>, self_id: ContextId) -> Self {
        Self {
            store,
            self_id,
            last_new: None,
            last_old: None,
        }
    }

    pub fn self_id(&self) -> &ContextId {
        &self.self_id
    }

    /// Construct and ship an envelope
    ///
    /// Returns the envelope when it must also be delivered to local
    /// subscribers (broadcasts and self-addressed messages). Fails fast
    /// and loudly while the channel is unsupported.
    pub fn broadcast(
        &self,
        support: &SupportState,
        event: EventKind,
        data: serde_json::Value,
        destination: Option<ContextId>,
    ) -> Result<Option<Envelope>, CrosslinkError> {
        if !support.supported() {
            return Err(CrosslinkError::Unsupported {
                reasons: support.reasons(),
            });
        }

        let envelope = Envelope::new(event, data, destination, self.self_id.clone(), now_ms());

        // Self-addressed messages never round trip through storage
        if envelope.destination.as_ref() != Some(&envelope.origin) {
            let value = StoredValue::new(
                self.self_id.clone(),
                serde_json::to_value(&envelope)?,
                envelope.timestamp,
            );
            self.store.set(StoreKey::Message.as_str(), &value.encode()?)?;
        }

        if envelope.addressed_to(&self.self_id) {
            Ok(Some(envelope))
        } else {
            Ok(None)
        }
    }

    /// Filter and decode one raw change notification
    pub fn on_change(&mut self, change: &ChangeEvent) -> Option<Inbound> {
        let key = StoreKey::parse(&change.key)?;

        let value = StoredValue::decode(change.new_value.as_deref()?)?;
        if value.origin == self.self_id {
            // Echo of our own write; some channels deliver those anyway
            return None;
        }

        if change.new_value == self.last_new && change.old_value == self.last_old {
            debug!(key = %change.key, "MessageBus::on_change: duplicate notification dropped");
            return None;
        }
        self.last_new = change.new_value.clone();
        self.last_old = change.old_value.clone();

        match key {
            StoreKey::Message => {
                let envelope: Envelope = serde_json::from_value(value.data).ok()?;
                if envelope.addressed_to(&self.self_id) {
                    Some(Inbound::Message(envelope))
                } else {
                    None
                }
            }
            StoreKey::Frozen => Some(Inbound::FrozenVerdict(value.data.as_bool()?)),
            StoreKey::Supported => Some(Inbound::SupportedVerdict(value.data.as_bool()?)),
            // Registry snapshots are master-written state, not messages;
            // contexts rebuild their mirror from heartbeats instead.
            StoreKey::Registry => None,
        }
    }

    /// Persist a value under a coordination key, wrapped and origin-tagged
    pub fn persist(&self, key: StoreKey, data: serde_json::Value) -> Result<(), CrosslinkError> {
        let value = StoredValue::new(self.self_id.clone(), data, now_ms());
        self.store.set(key.as_str(), &value.encode()?)?;
        Ok(())
    }

    /// Read a persisted value; malformed payloads read as absent
    pub fn read(&self, key: StoreKey) -> Option<StoredValue> {
        match self.store.get(key.as_str()) {
            Ok(Some(raw)) => StoredValue::decode(&raw),
            Ok(None) => None,
            Err(err) => {
                warn!(key = key.as_str(), %err, "MessageBus::read failed");
                None
            }
        }
    }

    pub fn remove(&self, key: StoreKey) -> Result<(), CrosslinkError> {
        self.store.remove(key.as_str())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sharedstore::{Capability, MemoryStore};

    fn id(n: u32) -> ContextId {
        ContextId::from_parts(1_700_000_000_000, n)
    }

    fn supported_state() -> SupportState {
        SupportState::new(Capability {
            available: true,
            writable: true,
            notifies: true,
        })
    }

    fn bus_over(store: &MemoryStore, me: ContextId) -> MessageBus {
        MessageBus::new(Arc::new(store.handle()), me)
    }

    fn message_change(origin: ContextId, envelope: &Envelope) -> ChangeEvent {
        let value = StoredValue::new(origin, serde_json::to_value(envelope).unwrap(), envelope.timestamp);
        ChangeEvent {
            key: StoreKey::Message.as_str().to_string(),
            old_value: None,
            new_value: Some(value.encode().unwrap()),
        }
    }

    #[test]
    fn test_broadcast_writes_store_and_delivers_locally() {
        let store = MemoryStore::new();
        let bus = bus_over(&store, id(1));

        let local = bus
            .broadcast(&supported_state(), EventKind::Heartbeat, json!({"n": 1}), None)
            .unwrap();

        assert!(local.is_some());
        assert!(store.raw(StoreKey::Message.as_str()).is_some());
    }

    #[test]
    fn test_self_addressed_broadcast_skips_store() {
        let store = MemoryStore::new();
        let bus = bus_over(&store, id(1));

        // Delivered locally, twice for two calls, with no store write
        for _ in 0..2 {
            let local = bus
                .broadcast(&supported_state(), EventKind::user("note"), json!("hi"), Some(id(1)))
                .unwrap();
            assert!(local.is_some());
        }
        assert!(store.raw(StoreKey::Message.as_str()).is_none());
    }

    #[test]
    fn test_unicast_to_peer_not_delivered_locally() {
        let store = MemoryStore::new();
        let bus = bus_over(&store, id(1));

        let local = bus
            .broadcast(&supported_state(), EventKind::Ping, json!(null), Some(id(2)))
            .unwrap();
        assert!(local.is_none());
        assert!(store.raw(StoreKey::Message.as_str()).is_some());
    }

    #[test]
    fn test_broadcast_unsupported_fails_fast() {
        let store = MemoryStore::new();
        let bus = bus_over(&store, id(1));
        let mut support = supported_state();
        support.mark_frozen();

        let err = bus
            .broadcast(&support, EventKind::Heartbeat, json!(null), None)
            .unwrap_err();
        assert!(matches!(err, CrosslinkError::Unsupported { .. }));
        assert!(err.to_string().contains("frozen environment detected"));
        assert!(store.raw(StoreKey::Message.as_str()).is_none());
    }

    #[test]
    fn test_on_change_ignores_foreign_keys() {
        let store = MemoryStore::new();
        let mut bus = bus_over(&store, id(1));

        let change = ChangeEvent {
            key: "someone.elses.key".to_string(),
            old_value: None,
            new_value: Some("{}".to_string()),
        };
        assert_eq!(bus.on_change(&change), None);
    }

    #[test]
    fn test_on_change_drops_self_echo() {
        let store = MemoryStore::new();
        let mut bus = bus_over(&store, id(1));

        let envelope = Envelope::new(EventKind::Heartbeat, json!(null), None, id(1), 0);
        assert_eq!(bus.on_change(&message_change(id(1), &envelope)), None);
    }

    #[test]
    fn test_on_change_drops_malformed_and_originless() {
        let store = MemoryStore::new();
        let mut bus = bus_over(&store, id(1));

        for raw in ["garbage", "{}", "{\"data\": {}}"] {
            let change = ChangeEvent {
                key: StoreKey::Message.as_str().to_string(),
                old_value: None,
                new_value: Some(raw.to_string()),
            };
            assert_eq!(bus.on_change(&change), None);
        }
    }

    #[test]
    fn test_on_change_duplicate_suppression() {
        let store = MemoryStore::new();
        let mut bus = bus_over(&store, id(1));

        let envelope = Envelope::new(EventKind::Heartbeat, json!(null), None, id(2), 0);
        let change = message_change(id(2), &envelope);

        assert!(bus.on_change(&change).is_some());
        // Exact repeat: same encoded new/old values
        assert_eq!(bus.on_change(&change), None);

        // A different write passes again
        let envelope = Envelope::new(EventKind::Heartbeat, json!(null), None, id(2), 1);
        assert!(bus.on_change(&message_change(id(2), &envelope)).is_some());
    }

    #[test]
    fn test_on_change_filters_destination() {
        let store = MemoryStore::new();
        let mut bus = bus_over(&store, id(1));

        let for_me = Envelope::new(EventKind::Pong, json!(null), Some(id(1)), id(2), 0);
        assert!(matches!(
            bus.on_change(&message_change(id(2), &for_me)),
            Some(Inbound::Message(_))
        ));

        let for_other = Envelope::new(EventKind::Pong, json!(null), Some(id(3)), id(2), 1);
        assert_eq!(bus.on_change(&message_change(id(2), &for_other)), None);
    }

    #[test]
    fn test_on_change_verdict_keys() {
        let store = MemoryStore::new();
        let mut bus = bus_over(&store, id(1));

        let value = StoredValue::new(id(2), json!(true), 10);
        let change = ChangeEvent {
            key: StoreKey::Frozen.as_str().to_string(),
            old_value: None,
            new_value: Some(value.encode().unwrap()),
        };
        assert_eq!(bus.on_change(&change), Some(Inbound::FrozenVerdict(true)));

        let value = StoredValue::new(id(2), json!(false), 11);
        let change = ChangeEvent {
            key: StoreKey::Supported.as_str().to_string(),
            old_value: None,
            new_value: Some(value.encode().unwrap()),
        };
        assert_eq!(bus.on_change(&change), Some(Inbound::SupportedVerdict(false)));
    }

    #[test]
    fn test_persist_and_read_round_trip() {
        let store = MemoryStore::new();
        let bus = bus_over(&store, id(1));

        bus.persist(StoreKey::Supported, json!(true)).unwrap();
        let value = bus.read(StoreKey::Supported).unwrap();
        assert_eq!(value.origin, id(1));
        assert_eq!(value.data, json!(true));

        bus.remove(StoreKey::Supported).unwrap();
        assert!(bus.read(StoreKey::Supported).is_none());
    }
}
