//! Keepalive support types
//!
//! The keepalive loop itself lives in the node task (it owns all the
//! state); this module holds the pieces that are worth testing on their
//! own: the heartbeat payload and the bootstrap probe bookkeeping.

use serde_json::json;

use crate::identity::ContextId;
use crate::registry::PeerRecord;

/// The heartbeat payload a context broadcasts for itself
pub fn heartbeat_payload(self_id: &ContextId, now_ms: i64) -> serde_json::Value {
    json!(PeerRecord::new(self_id.clone(), now_ms))
}

/// Bootstrap probe bookkeeping
///
/// At most one ping is in flight at a time. Each armed probe gets a fresh
/// sequence number; a timeout notification only counts if it carries the
/// sequence of the probe still in flight, so a pong that lands first
/// cancels the pending timeout by making it stale.
#[derive(Debug, Default)]
pub struct Probe {
    seq: u64,
    in_flight: bool,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a probe, returning its sequence number
    pub fn arm(&mut self) -> u64 {
        self.seq += 1;
        self.in_flight = true;
        self.seq
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// A pong arrived; the armed probe (if any) is satisfied
    pub fn resolve(&mut self) {
        self.in_flight = false;
    }

    /// Whether a timeout notification refers to the probe still in flight
    pub fn is_current(&self, seq: u64) -> bool {
        self.in_flight && self.seq == seq
    }
}
