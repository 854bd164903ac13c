// Stats - Sync pass counters, inventory census and circuit-breaker state
use serde::{Deserialize, Serialize};

/// Counters for one sync pass; all start at zero and only grow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperationStats {
    pub tokens_imported: u64,
    pub tokens_removed: u64,
    pub tokens_updated: u64,
    pub conflicts_resolved: u64,
    pub tokens_validated: u64,
    pub tombstones_added: u64,
    /// Tokens kept although verification or a spent-check was inconclusive
    pub tokens_unverified: u64,
}

/// Point-in-time census of the local replica
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInventoryStats {
    pub active_tokens: usize,
    pub sent_tokens: usize,
    pub outbox_tokens: usize,
    pub invalid_tokens: usize,
    pub nametag_tokens: usize,
    pub tombstone_count: usize,
}

/// Persisted circuit-breaker state
///
/// `local_mode_active` implies `local_mode_activated_at` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub local_mode_active: bool,
    #[serde(default)]
    pub local_mode_activated_at: Option<u64>,
    #[serde(default)]
    pub next_recovery_attempt: Option<u64>,
    pub consecutive_conflicts: u32,
    pub consecutive_ipfs_failures: u32,
    #[serde(default)]
    pub last_conflict_timestamp: Option<u64>,
}
