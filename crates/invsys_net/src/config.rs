//! Synchronization settings

use invsys_inventory::engine::DEFAULT_UNBOUNDED_SLOT_LIMIT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts and limits of replica synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How long to wait for a requested snapshot before asking again (ms)
    #[serde(default = "default_resync_timeout_ms")]
    pub resync_timeout_ms: u64,

    /// Snapshot requests per gap before the replica is marked stale
    #[serde(default = "default_max_resync_attempts")]
    pub max_resync_attempts: u32,

    /// Out-of-order deltas kept per container while waiting for a snapshot
    #[serde(default = "default_max_buffered_deltas")]
    pub max_buffered_deltas: usize,

    /// Age at which an unresolved speculative transaction is reverted (ms)
    #[serde(default = "default_speculation_timeout_ms")]
    pub speculation_timeout_ms: u64,

    /// Interval between retransmissions of an authority handshake step (ms)
    #[serde(default = "default_handshake_retry_ms")]
    pub handshake_retry_ms: u64,

    /// Retransmissions of one handshake step before the handover is abandoned
    #[serde(default = "default_max_handshake_attempts")]
    pub max_handshake_attempts: u32,

    /// Slots a replica accepts from the wire, for unbounded and fixed capacities
    #[serde(default = "default_unbounded_slot_limit")]
    pub unbounded_slot_limit: u32,
}

fn default_resync_timeout_ms() -> u64 {
    2000
}

fn default_max_resync_attempts() -> u32 {
    3
}

fn default_max_buffered_deltas() -> usize {
    256
}

fn default_speculation_timeout_ms() -> u64 {
    5000
}

fn default_handshake_retry_ms() -> u64 {
    500
}

fn default_max_handshake_attempts() -> u32 {
    5
}

fn default_unbounded_slot_limit() -> u32 {
    DEFAULT_UNBOUNDED_SLOT_LIMIT
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resync_timeout_ms: default_resync_timeout_ms(),
            max_resync_attempts: default_max_resync_attempts(),
            max_buffered_deltas: default_max_buffered_deltas(),
            speculation_timeout_ms: default_speculation_timeout_ms(),
            handshake_retry_ms: default_handshake_retry_ms(),
            max_handshake_attempts: default_max_handshake_attempts(),
            unbounded_slot_limit: default_unbounded_slot_limit(),
        }
    }
}

impl SyncConfig {
    /// Short timeouts for tests driven by a synthetic clock
    pub fn testing() -> Self {
        Self {
            resync_timeout_ms: 100,
            max_resync_attempts: 2,
            max_buffered_deltas: 16,
            speculation_timeout_ms: 250,
            handshake_retry_ms: 50,
            max_handshake_attempts: 3,
            unbounded_slot_limit: default_unbounded_slot_limit(),
        }
    }

    /// Set the snapshot wait window
    pub fn with_resync_timeout_ms(mut self, ms: u64) -> Self {
        self.resync_timeout_ms = ms;
        self
    }

    /// Set the snapshot request limit
    pub fn with_max_resync_attempts(mut self, attempts: u32) -> Self {
        self.max_resync_attempts = attempts.max(1);
        self
    }

    /// Set the out-of-order buffer size
    pub fn with_max_buffered_deltas(mut self, max: usize) -> Self {
        self.max_buffered_deltas = max;
        self
    }

    /// Set the speculation timeout
    pub fn with_speculation_timeout_ms(mut self, ms: u64) -> Self {
        self.speculation_timeout_ms = ms;
        self
    }

    /// Set the handshake retransmission interval
    pub fn with_handshake_retry_ms(mut self, ms: u64) -> Self {
        self.handshake_retry_ms = ms;
        self
    }

    /// Set the handshake retransmission limit
    pub fn with_max_handshake_attempts(mut self, attempts: u32) -> Self {
        self.max_handshake_attempts = attempts.max(1);
        self
    }

    /// Set the replica slot limit
    pub fn with_unbounded_slot_limit(mut self, limit: u32) -> Self {
        self.unbounded_slot_limit = limit;
        self
    }

    pub fn resync_timeout(&self) -> Duration {
        Duration::from_millis(self.resync_timeout_ms)
    }

    pub fn speculation_timeout(&self) -> Duration {
        Duration::from_millis(self.speculation_timeout_ms)
    }

    pub fn handshake_retry(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_ms)
    }
}
