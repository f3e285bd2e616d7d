//! Master election
//!
//! A synchronous state machine: inputs are election triggers and promotion
//! announcements, outputs are [`Effect`]s the node run loop interprets
//! (broadcast, emit, persist). Keeping the transitions pure makes the race
//! behavior deterministic under any delivery order.
//!
//! The single total ordering is lexical id comparison; the lowest id wins.
//! When a context with a lower id sees a competing announcement it defers
//! its own re-announcement one scheduling round instead of replying inline
//! ("bullying"), which collapses cold-start races within one extra round.

use tracing::debug;

use crate::identity::ContextId;
use crate::registry::{PeerRecord, Registry};

/// Leadership bookkeeping states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// No master known
    NoMaster,
    /// This context announced itself and is contesting the race
    PendingSelf,
    /// A master (possibly self) is recorded
    MasterAssigned,
}

/// Side effects the run loop must carry out after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Broadcast a promotion announcement naming this context
    AnnounceSelf,
    /// Schedule an announce-self at the next scheduling opportunity
    DeferBully,
    /// This context just became master
    BecameMaster,
    /// This context just lost mastership
    Demoted,
    /// This context is master and must persist the registry
    PersistRegistry,
}

pub struct Election {
    self_id: ContextId,
    state: ElectionState,
    bully_pending: bool,
}

impl Election {
    pub fn new(self_id: ContextId) -> Self {
        Self {
            self_id,
            state: ElectionState::NoMaster,
            bully_pending: false,
        }
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    /// Whether the recorded master is this context
    pub fn is_master(&self, registry: &Registry) -> bool {
        registry.master_id() == Some(&self.self_id)
    }

    /// Hold an election: scan known peers and pick the lowest id
    ///
    /// Fired when no master is known, on peer-closed or on the first
    /// heartbeat with an empty master slot. If the winner is this context
    /// it announces itself; otherwise the winner is recorded provisionally
    /// so the system has *a* candidate master before any confirmation
    /// arrives.
    pub fn run_election(&mut self, registry: &mut Registry, now_ms: i64) -> Vec<Effect> {
        let winner = registry.lowest_id().cloned();
        debug!(self_id = %self.self_id, winner = ?winner, "Election::run_election");

        match winner {
            Some(winner) if winner != self.self_id => {
                registry.set_master(PeerRecord::new(winner, now_ms));
                self.state = ElectionState::NoMaster;
                vec![]
            }
            _ => {
                // Sole candidate, or lowest among the known peers
                self.state = ElectionState::PendingSelf;
                vec![Effect::AnnounceSelf]
            }
        }
    }

    /// Handle a promotion announcement, from any origin including self
    pub fn on_promoted(&mut self, registry: &mut Registry, announced: ContextId, timestamp: i64) -> Vec<Effect> {
        let previous_master = registry.master_id().cloned();

        // Bully out competing broadcasts when our id is lower
        if self.self_id < announced {
            debug!(self_id = %self.self_id, %announced, "Election::on_promoted: contesting");
            if self.bully_pending {
                return vec![];
            }
            self.bully_pending = true;
            return vec![Effect::DeferBully];
        }

        registry.set_master(PeerRecord::new(announced.clone(), timestamp));
        self.state = ElectionState::MasterAssigned;

        let is_master = announced == self.self_id;
        let was_master = previous_master.as_ref() == Some(&self.self_id);

        let mut effects = Vec::new();
        if is_master {
            effects.push(Effect::PersistRegistry);
        }
        if is_master && !was_master {
            debug!(self_id = %self.self_id, "Election::on_promoted: became master");
            effects.push(Effect::BecameMaster);
        } else if !is_master && was_master {
            debug!(self_id = %self.self_id, %announced, "Election::on_promoted: demoted");
            effects.push(Effect::Demoted);
        }
        effects
    }

    /// The deferred bully announcement fires
    pub fn bully_fired(&mut self) -> Vec<Effect> {
        self.bully_pending = false;
        vec![Effect::AnnounceSelf]
    }
}
