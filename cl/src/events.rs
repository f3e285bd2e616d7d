//! Local event dispatch
//!
//! Subscribers are keyed: registering a handler under an existing key
//! replaces the previous handler in place, and `once` handlers remove
//! themselves after the first delivery (with a synthesized key when the
//! caller supplies none). Dispatch is synchronous and runs in registration
//! order; handlers added while an emission is in flight do not see the
//! current envelope.

use std::collections::HashMap;

use tracing::debug;

use crate::envelope::{Envelope, EventKind};
use crate::identity::ContextId;

/// A registered event handler
pub type Handler = Box<dyn FnMut(&Envelope) + Send>;

/// Key identifying a handler registration for later replacement or removal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey(String);

impl HandlerKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for HandlerKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for HandlerKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

struct Registration {
    key: HandlerKey,
    once: bool,
    handler: Handler,
}

/// Typed dispatch table mapping event kinds to keyed handler lists
#[derive(Default)]
pub struct Dispatcher {
    table: HashMap<EventKind, Vec<Registration>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a key
    ///
    /// An existing registration with the same key is replaced in place,
    /// keeping its position in the delivery order. With no key a fresh one
    /// is synthesized and the handler simply appends.
    pub fn on(&mut self, kind: EventKind, key: Option<HandlerKey>, handler: Handler) -> HandlerKey {
        self.add(kind, key, handler, false)
    }

    /// Register a handler that fires at most once, then unsubscribes itself
    pub fn once(&mut self, kind: EventKind, key: Option<HandlerKey>, handler: Handler) -> HandlerKey {
        self.add(kind, key, handler, true)
    }

    fn add(&mut self, kind: EventKind, key: Option<HandlerKey>, handler: Handler, once: bool) -> HandlerKey {
        let entries = self.table.entry(kind).or_default();

        let key = key.unwrap_or_else(|| {
            // Synthesize a key that is unique within this event's list
            let mut candidate = HandlerKey(ContextId::generate().as_str().to_string());
            while entries.iter().any(|r| r.key == candidate) {
                candidate = HandlerKey(ContextId::generate().as_str().to_string());
            }
            candidate
        });

        if let Some(existing) = entries.iter_mut().find(|r| r.key == key) {
            existing.handler = handler;
            existing.once = once;
        } else {
            entries.push(Registration {
                key: key.clone(),
                once,
                handler,
            });
        }

        key
    }

    /// Remove one handler; returns whether anything was removed
    pub fn off(&mut self, kind: &EventKind, key: &HandlerKey) -> bool {
        let Some(entries) = self.table.get_mut(kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|r| &r.key != key);
        before != entries.len()
    }

    /// Remove every handler for an event kind
    pub fn off_all(&mut self, kind: &EventKind) -> bool {
        self.table.remove(kind).is_some()
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Deliver an envelope to every handler registered for its event kind
    pub fn emit(&mut self, envelope: &Envelope) {
        let Some(entries) = self.table.get_mut(&envelope.event) else {
            return;
        };

        // Snapshot the keys so handlers registered mid-emission do not run
        // for this envelope.
        let keys: Vec<HandlerKey> = entries.iter().map(|r| r.key.clone()).collect();
        debug!(event = ?envelope.event, handlers = keys.len(), "Dispatcher::emit");

        for key in keys {
            let Some(entries) = self.table.get_mut(&envelope.event) else {
                return;
            };
            let Some(pos) = entries.iter().position(|r| r.key == key) else {
                continue;
            };

            if entries[pos].once {
                let mut registration = entries.remove(pos);
                (registration.handler)(envelope);
            } else {
                (entries[pos].handler)(envelope);
            }
        }
    }

    /// Number of handlers registered for an event kind
    pub fn len(&self, kind: &EventKind) -> usize {
        self.table.get(kind).map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.table.values().all(|e| e.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn envelope(kind: EventKind) -> Envelope {
        let origin = ContextId::from_parts(1_700_000_000_000, 1);
        Envelope::new(kind, serde_json::Value::Null, None, origin, 0)
    }

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let handler: Handler = Box::new(move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn test_on_and_emit() {
        let mut dispatcher = Dispatcher::new();
        let (count, handler) = counter();
        dispatcher.on(EventKind::Heartbeat, None, handler);

        dispatcher.emit(&envelope(EventKind::Heartbeat));
        dispatcher.emit(&envelope(EventKind::Heartbeat));
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // Other kinds do not trigger it
        dispatcher.emit(&envelope(EventKind::Ping));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_replace_by_key() {
        let mut dispatcher = Dispatcher::new();
        let (first_count, first) = counter();
        let (second_count, second) = counter();

        dispatcher.on(EventKind::Heartbeat, Some("slot".into()), first);
        dispatcher.on(EventKind::Heartbeat, Some("slot".into()), second);
        assert_eq!(dispatcher.len(&EventKind::Heartbeat), 1);

        dispatcher.emit(&envelope(EventKind::Heartbeat));
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_unsubscribes() {
        let mut dispatcher = Dispatcher::new();
        let (count, handler) = counter();
        dispatcher.once(EventKind::Pong, None, handler);

        dispatcher.emit(&envelope(EventKind::Pong));
        dispatcher.emit(&envelope(EventKind::Pong));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.len(&EventKind::Pong), 0);
    }

    #[test]
    fn test_once_synthesizes_unique_keys() {
        let mut dispatcher = Dispatcher::new();
        let (_, a) = counter();
        let (_, b) = counter();
        let key_a = dispatcher.once(EventKind::Pong, None, a);
        let key_b = dispatcher.once(EventKind::Pong, None, b);
        assert_ne!(key_a, key_b);
        assert_eq!(dispatcher.len(&EventKind::Pong), 2);
    }

    #[test]
    fn test_off() {
        let mut dispatcher = Dispatcher::new();
        let (count, handler) = counter();
        let key = dispatcher.on(EventKind::Heartbeat, None, handler);

        assert!(dispatcher.off(&EventKind::Heartbeat, &key));
        assert!(!dispatcher.off(&EventKind::Heartbeat, &key));

        dispatcher.emit(&envelope(EventKind::Heartbeat));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_off_all_and_clear() {
        let mut dispatcher = Dispatcher::new();
        let (_, a) = counter();
        let (_, b) = counter();
        dispatcher.on(EventKind::Heartbeat, None, a);
        dispatcher.on(EventKind::Ping, None, b);

        assert!(dispatcher.off_all(&EventKind::Heartbeat));
        assert_eq!(dispatcher.len(&EventKind::Heartbeat), 0);
        assert_eq!(dispatcher.len(&EventKind::Ping), 1);

        dispatcher.clear();
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_user_events_keyed_by_name() {
        let mut dispatcher = Dispatcher::new();
        let (count_a, a) = counter();
        let (count_b, b) = counter();
        dispatcher.on(EventKind::user("alpha"), None, a);
        dispatcher.on(EventKind::user("beta"), None, b);

        dispatcher.emit(&envelope(EventKind::user("alpha")));
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let mut dispatcher = Dispatcher::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            dispatcher.on(
                EventKind::Heartbeat,
                Some(name.into()),
                Box::new(move |_| order.lock().unwrap().push(name)),
            );
        }

        dispatcher.emit(&envelope(EventKind::Heartbeat));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }
}
