//! Store contract types

use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur against the shared store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shared store not available")]
    Unavailable,

    #[error("store writes not permitted")]
    WriteDenied,

    #[error("stored value corrupt at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// Check whether retrying the same operation could ever succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Unavailable => false,
            StoreError::WriteDenied => false,
            StoreError::Corrupt { .. } => false,
        }
    }
}

/// A mutation performed by some other handle of the same store
///
/// `old_value`/`new_value` are the raw encoded values before and after the
/// mutation; `new_value` is `None` for removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// What the environment can actually do
///
/// Restricted environments may expose a store that silently rejects writes
/// or never delivers change notifications; the probe reports each axis
/// separately so callers can enumerate the reasons coordination is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    /// The store itself is present and readable
    pub available: bool,
    /// `set`/`remove` are permitted
    pub writable: bool,
    /// Change notifications are delivered at all
    pub notifies: bool,
}

impl Capability {
    /// True when every axis is usable
    pub fn supported(&self) -> bool {
        self.available && self.writable && self.notifies
    }
}

/// The persistent key-value medium shared by all coordinating contexts
///
/// One implementor instance represents one context's connection to the
/// medium. `subscribe` yields mutations made by *other* contexts only;
/// implementations must not echo a handle's own writes back to it.
pub trait SharedStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Subscribe to mutations performed by other handles
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChangeEvent>;

    /// Report what this environment supports
    fn probe(&self) -> Capability;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_supported() {
        let cap = Capability {
            available: true,
            writable: true,
            notifies: true,
        };
        assert!(cap.supported());

        let cap = Capability {
            available: true,
            writable: false,
            notifies: true,
        };
        assert!(!cap.supported());
    }

    #[test]
    fn test_store_error_not_retryable() {
        assert!(!StoreError::Unavailable.is_retryable());
        assert!(!StoreError::WriteDenied.is_retryable());
        assert!(
            !StoreError::Corrupt {
                key: "k".to_string(),
                reason: "bad json".to_string()
            }
            .is_retryable()
        );
    }
}
