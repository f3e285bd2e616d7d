//! Channel support tracking
//!
//! Whether coordination is possible at all: the capability probe result,
//! the frozen-environment flag, and cached verdicts observed from the
//! store all fold into a single `supported` answer. Once that answer is
//! false every broadcast fails fast with the full list of reasons; the
//! system never coordinates silently in a degraded mode.

use sharedstore::Capability;

use crate::error::UnsupportedReason;

#[derive(Debug, Clone, Copy)]
pub struct SupportState {
    capability: Capability,
    frozen: bool,
    vetoed: bool,
    supported: bool,
}

impl SupportState {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            frozen: false,
            vetoed: false,
            supported: capability.supported(),
        }
    }

    pub fn supported(&self) -> bool {
        self.supported
    }

    pub fn frozen(&self) -> bool {
        self.frozen
    }

    /// This context detected a frozen environment (probe timed out)
    pub fn mark_frozen(&mut self) {
        self.frozen = true;
        self.supported = false;
    }

    /// A cached supported verdict applies at startup; it is authoritative
    pub fn cache_supported(&mut self, verdict: bool) {
        self.supported = verdict;
        self.vetoed = !verdict;
    }

    /// A peer wrote a frozen verdict while we are running
    ///
    /// A clearing observation only drops the flag while support is still
    /// intact; once support has been revoked the reason stays on record.
    pub fn observe_frozen(&mut self, frozen: bool) {
        if frozen {
            self.frozen = true;
            self.supported = false;
        } else if self.supported {
            self.frozen = false;
        }
    }

    /// A peer wrote a supported verdict while we are running
    ///
    /// Can only revoke support, never grant it back.
    pub fn observe_supported(&mut self, verdict: bool) {
        if !verdict {
            self.vetoed = true;
        }
        self.supported = self.supported && verdict;
    }

    /// Every reason the channel is currently unusable
    pub fn reasons(&self) -> Vec<UnsupportedReason> {
        let mut reasons = Vec::new();
        if !self.capability.available {
            reasons.push(UnsupportedReason::StoreUnavailable);
        }
        if !self.capability.notifies {
            reasons.push(UnsupportedReason::NotificationsUnavailable);
        }
        if self.frozen {
            reasons.push(UnsupportedReason::FrozenEnvironment);
        }
        if !self.capability.writable {
            reasons.push(UnsupportedReason::WritesDenied);
        }
        if self.vetoed {
            reasons.push(UnsupportedReason::PeerVeto);
        }
        reasons
    }
}
