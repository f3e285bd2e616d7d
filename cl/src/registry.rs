//! Peer liveness bookkeeping
//!
//! Every context maintains its own in-memory registry built from observed
//! heartbeat and closure events; only the current master persists it to
//! the shared store. The master slot is kept separate from the peer map so
//! nothing downstream has to branch on what shape a record is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::ContextId;

/// One known live context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: ContextId,
    /// Last heartbeat observed from this peer, wall-clock milliseconds
    #[serde(rename = "last-updated")]
    pub last_updated: i64,
}

impl PeerRecord {
    pub fn new(id: ContextId, last_updated: i64) -> Self {
        Self { id, last_updated }
    }
}

/// Known peers plus the reserved master slot
///
/// The peer map is ordered by id, which makes the election scan a plain
/// first-entry lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub peers: BTreeMap<ContextId, PeerRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<PeerRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-or-update a peer from an observed heartbeat
    pub fn on_heartbeat(&mut self, record: PeerRecord) {
        // Refresh the master slot when the master itself heartbeats
        if let Some(master) = &mut self.master
            && master.id == record.id
        {
            master.last_updated = record.last_updated;
        }
        self.peers.insert(record.id.clone(), record);
    }

    /// Remove a peer after an explicit closure or a timeout
    ///
    /// Returns whether the removed peer was the current master; the master
    /// slot is cleared in that case.
    pub fn on_peer_closed(&mut self, id: &ContextId) -> bool {
        self.peers.remove(id);
        if self.master.as_ref().is_some_and(|m| &m.id == id) {
            self.master = None;
            true
        } else {
            false
        }
    }

    /// Lexically lowest known peer id, the election winner
    pub fn lowest_id(&self) -> Option<&ContextId> {
        self.peers.keys().next()
    }

    /// Peers silent for longer than the liveness window
    ///
    /// The master slot itself is never swept; its record lives in the peer
    /// map like any other and times out there.
    pub fn dead_peers(&self, now_ms: i64, window_ms: i64) -> Vec<ContextId> {
        self.peers
            .values()
            .filter(|peer| now_ms - peer.last_updated >= window_ms)
            .map(|peer| peer.id.clone())
            .collect()
    }

    pub fn master_id(&self) -> Option<&ContextId> {
        self.master.as_ref().map(|m| &m.id)
    }

    pub fn set_master(&mut self, record: PeerRecord) {
        self.master = Some(record);
    }

    pub fn contains(&self, id: &ContextId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Wipe everything (last context leaving resets the shared registry)
    pub fn clear(&mut self) {
        self.peers.clear();
        self.master = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> ContextId {
        ContextId::from_parts(1_700_000_000_000, n)
    }

    #[test]
    fn test_heartbeat_insert_and_update() {
        let mut registry = Registry::new();
        registry.on_heartbeat(PeerRecord::new(id(1), 100));
        assert_eq!(registry.len(), 1);

        registry.on_heartbeat(PeerRecord::new(id(1), 200));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.peers.get(&id(1)).unwrap().last_updated, 200);
    }

    #[test]
    fn test_master_slot_refreshed_by_master_heartbeat() {
        let mut registry = Registry::new();
        registry.set_master(PeerRecord::new(id(1), 100));
        registry.on_heartbeat(PeerRecord::new(id(1), 500));
        assert_eq!(registry.master.as_ref().unwrap().last_updated, 500);

        // Non-master heartbeats leave the slot alone
        registry.on_heartbeat(PeerRecord::new(id(2), 900));
        assert_eq!(registry.master.as_ref().unwrap().last_updated, 500);
    }

    #[test]
    fn test_peer_closed_clears_master() {
        let mut registry = Registry::new();
        registry.on_heartbeat(PeerRecord::new(id(1), 100));
        registry.on_heartbeat(PeerRecord::new(id(2), 100));
        registry.set_master(PeerRecord::new(id(1), 100));

        assert!(registry.on_peer_closed(&id(1)));
        assert!(registry.master.is_none());
        assert!(!registry.contains(&id(1)));

        assert!(!registry.on_peer_closed(&id(2)));
    }

    #[test]
    fn test_lowest_id() {
        let mut registry = Registry::new();
        assert!(registry.lowest_id().is_none());

        registry.on_heartbeat(PeerRecord::new(id(5), 100));
        registry.on_heartbeat(PeerRecord::new(id(2), 100));
        registry.on_heartbeat(PeerRecord::new(id(9), 100));
        assert_eq!(registry.lowest_id(), Some(&id(2)));
    }

    #[test]
    fn test_dead_peers_sweep() {
        let mut registry = Registry::new();
        registry.on_heartbeat(PeerRecord::new(id(1), 1_000));
        registry.on_heartbeat(PeerRecord::new(id(2), 4_500));

        let dead = registry.dead_peers(6_500, 5_000);
        assert_eq!(dead, vec![id(1)]);

        let dead = registry.dead_peers(10_000, 5_000);
        assert_eq!(dead.len(), 2);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut registry = Registry::new();
        registry.on_heartbeat(PeerRecord::new(id(1), 100));
        registry.on_heartbeat(PeerRecord::new(id(2), 150));
        registry.set_master(PeerRecord::new(id(1), 100));

        let json = serde_json::to_string(&registry).unwrap();
        let back: Registry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, registry);
    }

    #[test]
    fn test_clear() {
        let mut registry = Registry::new();
        registry.on_heartbeat(PeerRecord::new(id(1), 100));
        registry.set_master(PeerRecord::new(id(1), 100));
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.master.is_none());
    }
}
