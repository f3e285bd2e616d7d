//! Context identity generation
//!
//! Every running context mints exactly one [`ContextId`] at startup and
//! keeps it for life. Ids are wall-clock-prefixed so ordinary string
//! comparison matches creation order, which is the single tie-break used by
//! master election: the lexically lowest id wins.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// An opaque, totally-ordered context identifier
///
/// Format: decimal milliseconds-since-epoch followed by a random value in
/// `[0, 2^31)` zero-padded to 10 digits. The timestamp prefix dominates the
/// ordering; the suffix breaks ties within one millisecond with
/// overwhelming probability. Uniqueness is probabilistic, not absolute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Generate a fresh id from the wall clock and the thread RNG
    pub fn generate() -> Self {
        Self::from_parts(now_ms(), rand::rng().random_range(0..0x8000_0000u32))
    }

    /// Build an id from explicit parts (deterministic construction for tests)
    pub fn from_parts(timestamp_ms: i64, suffix: u32) -> Self {
        Self(format!("{timestamp_ms}{suffix:010}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContextId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContextId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ContextId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Current wall-clock time in milliseconds since the epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generate_shape() {
        let id = ContextId::generate();
        // 13-digit ms timestamp + 10-digit suffix
        assert_eq!(id.as_str().len(), 23);
        assert!(id.as_str().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_suffix_zero_padded() {
        let id = ContextId::from_parts(1_700_000_000_000, 42);
        assert_eq!(id.as_str(), "17000000000000000000042");
    }

    #[test]
    fn test_ordering_follows_timestamp() {
        let earlier = ContextId::from_parts(1_700_000_000_000, 2_147_483_646);
        let later = ContextId::from_parts(1_700_000_000_001, 0);
        assert!(earlier < later);
    }

    #[test]
    fn test_serde_transparent() {
        let id = ContextId::from_parts(1_700_000_000_000, 7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"17000000000000000000007\"");
        let back: ContextId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    proptest! {
        // Ids minted at least 1ms apart must compare in generation order,
        // regardless of the random suffixes involved.
        #[test]
        fn prop_order_matches_generation(
            ts in 1_000_000_000_000i64..9_000_000_000_000i64,
            gap in 1i64..1_000_000,
            a in 0u32..0x8000_0000,
            b in 0u32..0x8000_0000,
        ) {
            let first = ContextId::from_parts(ts, a);
            let second = ContextId::from_parts(ts + gap, b);
            prop_assert!(first < second);
        }
    }
}
