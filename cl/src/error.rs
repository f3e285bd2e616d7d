//! Crosslink error types

use sharedstore::StoreError;
use thiserror::Error;

/// Why the coordination channel is unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedReason {
    StoreUnavailable,
    NotificationsUnavailable,
    FrozenEnvironment,
    WritesDenied,
    PeerVeto,
}

impl UnsupportedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnsupportedReason::StoreUnavailable => "shared store not available",
            UnsupportedReason::NotificationsUnavailable => "change notifications not available",
            UnsupportedReason::FrozenEnvironment => "frozen environment detected",
            UnsupportedReason::WritesDenied => "store writes not permitted",
            UnsupportedReason::PeerVeto => "a peer recorded coordination as unsupported",
        }
    }
}

/// Errors that can occur during coordination
#[derive(Debug, Error)]
pub enum CrosslinkError {
    /// The coordination channel is confirmed unusable; not retryable
    #[error("crosslink not supported: {}", format_reasons(reasons))]
    Unsupported { reasons: Vec<UnsupportedReason> },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// No master is known yet, so a master-addressed message has no target
    #[error("no master context known")]
    NoMaster,

    /// The node task has shut down
    #[error("crosslink node channel closed")]
    ChannelClosed,
}

impl CrosslinkError {
    /// Fatal errors must not be treated as transient by callers
    pub fn is_fatal(&self) -> bool {
        match self {
            CrosslinkError::Unsupported { .. } => true,
            CrosslinkError::Store(err) => !err.is_retryable(),
            CrosslinkError::Encoding(_) => false,
            CrosslinkError::NoMaster => false,
            CrosslinkError::ChannelClosed => true,
        }
    }
}

fn format_reasons(reasons: &[UnsupportedReason]) -> String {
    if reasons.is_empty() {
        return "unknown reason".to_string();
    }
    reasons
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
