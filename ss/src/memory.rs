//! In-process reference store
//!
//! [`MemoryStore`] is the shared medium; each coordinating context takes a
//! [`MemoryHandle`] from it. Writes through one handle notify every other
//! handle's subscribers but never the writer's own, matching the contract
//! in [`SharedStore`].
//!
//! Test knobs: [`MemoryStore::deny_writes`] simulates a write-restricted
//! environment, [`MemoryHandle::suppress_notifications`] simulates a frozen
//! context whose change notifications never fire, and
//! [`MemoryStore::inject`] pushes a raw event to every handle (duplicate
//! delivery defects and the like).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::store::{Capability, ChangeEvent, SharedStore, StoreError};

struct Subscriber {
    handle_id: u64,
    suppressed: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

struct Inner {
    map: Mutex<HashMap<String, String>>,
    subscribers: Mutex<Vec<Subscriber>>,
    deny_writes: AtomicBool,
    next_handle_id: AtomicU64,
}

impl Inner {
    fn map(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fan a change out to every subscriber except those owned by `writer`
    fn notify(&self, writer: u64, event: &ChangeEvent) {
        let mut subs = self.subscribers();
        subs.retain(|sub| {
            if sub.handle_id == writer {
                return true;
            }
            if sub.suppressed.load(Ordering::Relaxed) {
                // Frozen handle: keep the subscription, deliver nothing
                return true;
            }
            // Drop subscribers whose receiver has gone away
            sub.tx.send(event.clone()).is_ok()
        });
    }
}

/// The shared in-process medium
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                map: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
                deny_writes: AtomicBool::new(false),
                next_handle_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create an independent client of this medium
    ///
    /// Each coordinating context gets its own handle; its writes are not
    /// echoed back through its own subscription.
    pub fn handle(&self) -> MemoryHandle {
        let handle_id = self.inner.next_handle_id.fetch_add(1, Ordering::Relaxed);
        debug!(handle_id, "MemoryStore::handle: created");
        MemoryHandle {
            inner: Arc::clone(&self.inner),
            handle_id,
            suppress_notifications: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reject all subsequent writes through any handle
    pub fn deny_writes(&self) {
        self.inner.deny_writes.store(true, Ordering::Relaxed);
    }

    /// Push a raw change event to every handle's subscribers
    pub fn inject(&self, event: ChangeEvent) {
        // writer id 0 is never allocated to a handle
        self.inner.notify(0, &event);
    }

    /// Peek at the raw stored value (test inspection)
    pub fn raw(&self, key: &str) -> Option<String> {
        self.inner.map().get(key).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One context's connection to a [`MemoryStore`]
#[derive(Clone)]
pub struct MemoryHandle {
    inner: Arc<Inner>,
    handle_id: u64,
    suppress_notifications: Arc<AtomicBool>,
}

impl MemoryHandle {
    /// Stop delivering change notifications to this handle's subscribers
    ///
    /// Simulates the frozen environment where store writes land but the
    /// push channel never fires.
    pub fn suppress_notifications(&self) {
        self.suppress_notifications.store(true, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.inner.deny_writes.load(Ordering::Relaxed) {
            Err(StoreError::WriteDenied)
        } else {
            Ok(())
        }
    }
}

impl SharedStore for MemoryHandle {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.map().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let old_value = self.inner.map().insert(key.to_string(), value.to_string());
        let event = ChangeEvent {
            key: key.to_string(),
            old_value,
            new_value: Some(value.to_string()),
        };
        self.inner.notify(self.handle_id, &event);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let old_value = self.inner.map().remove(key);
        if old_value.is_none() {
            return Ok(());
        }
        let event = ChangeEvent {
            key: key.to_string(),
            old_value,
            new_value: None,
        };
        self.inner.notify(self.handle_id, &event);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers().push(Subscriber {
            handle_id: self.handle_id,
            suppressed: Arc::clone(&self.suppress_notifications),
            tx,
        });
        rx
    }

    fn probe(&self) -> Capability {
        Capability {
            available: true,
            writable: !self.inner.deny_writes.load(Ordering::Relaxed),
            notifies: !self.suppress_notifications.load(Ordering::Relaxed),
        }
    }
}
