//! Crosslink configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Protocol timing and channel sizing
///
/// The defaults are the protocol constants: heartbeats every 3s, peers
/// declared dead after 5s of silence, a 500ms bootstrap probe, and cached
/// capability verdicts honored for 10 minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrosslinkConfig {
    /// Heartbeat period in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Liveness window: peers silent longer than this are declared closed
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,

    /// Bootstrap ping/pong probe timeout in milliseconds
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// How long persisted supported/frozen verdicts stay valid
    #[serde(default = "default_verdict_cache_ms")]
    pub verdict_cache_ms: u64,

    /// Channel buffer size for node requests
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_heartbeat_interval_ms() -> u64 {
    3_000
}

fn default_peer_timeout_ms() -> u64 {
    5_000
}

fn default_ping_timeout_ms() -> u64 {
    500
}

fn default_verdict_cache_ms() -> u64 {
    10 * 60 * 1000
}

fn default_channel_buffer() -> usize {
    256
}

impl Default for CrosslinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            peer_timeout_ms: default_peer_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            verdict_cache_ms: default_verdict_cache_ms(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl CrosslinkConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}
