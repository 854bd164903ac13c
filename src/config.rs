//! Engine Configuration
//!
//! Tunables for validation fan-out, trust-base caching, leader election and
//! the circuit breaker. Defaults match the behaviour wallets ship with.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default aggregator endpoint
pub const DEFAULT_AGGREGATOR_URL: &str = "https://goggregator-test.unicity.network";

/// Main configuration of the inventory engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // === Aggregator ===

    /// Base URL of the aggregator (the proof RPC lives at `{url}/proof`)
    pub aggregator_url: String,

    /// Per-request timeout for aggregator calls (seconds)
    pub rpc_timeout_secs: u64,

    // === Validation ===

    /// Tokens validated concurrently per batch
    pub validation_batch_size: usize,

    /// Tokens spent-checked concurrently per batch
    pub spent_check_batch_size: usize,

    /// Trust base cache lifetime (seconds)
    pub trust_base_ttl_secs: u64,

    // === Storage ===

    /// Storage-port key holding the replica document
    pub storage_key: String,

    // === Coordination ===

    /// How long a sync pass waits for the lock (milliseconds)
    pub lock_timeout_ms: u64,

    pub leader: LeaderConfig,

    pub circuit_breaker: CircuitBreakerConfig,
}

/// Leader election timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderConfig {
    /// Interval between leader heartbeats (milliseconds)
    pub heartbeat_interval_ms: u64,

    /// Heartbeat silence after which the leader is considered dead (milliseconds)
    /// Should be at least 2x heartbeat_interval to allow one missed heartbeat
    pub leader_timeout_ms: u64,

    /// How long a candidate waits for objections before claiming (milliseconds)
    pub election_timeout_ms: u64,

    /// Resolution of the election timer (milliseconds)
    pub tick_interval_ms: u64,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 2_000,
            leader_timeout_ms: 5_000,
            election_timeout_ms: 1_000,
            tick_interval_ms: 250,
        }
    }
}

impl LeaderConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Local-mode escalation thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive conflicts before entering local mode
    pub conflict_threshold: u32,

    /// Consecutive replication failures before entering local mode
    pub ipfs_failure_threshold: u32,

    /// Delay between recovery attempts while in local mode (seconds)
    pub recovery_interval_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            conflict_threshold: 5,
            ipfs_failure_threshold: 3,
            recovery_interval_secs: 60,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // Aggregator
            aggregator_url: DEFAULT_AGGREGATOR_URL.to_string(),
            rpc_timeout_secs: 30,

            // Validation
            validation_batch_size: 5,
            spent_check_batch_size: 3,
            trust_base_ttl_secs: 60 * 60, // 60 minutes

            // Storage
            storage_key: "txf_inventory".to_string(),

            // Coordination
            lock_timeout_ms: 10_000,
            leader: LeaderConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_aggregator_url(mut self, url: impl Into<String>) -> Self {
        self.aggregator_url = url.into();
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn with_validation_batch_size(mut self, size: usize) -> Self {
        self.validation_batch_size = size;
        self
    }

    pub fn with_leader(mut self, leader: LeaderConfig) -> Self {
        self.leader = leader;
        self
    }

    pub fn trust_base_ttl(&self) -> Duration {
        Duration::from_secs(self.trust_base_ttl_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validation_batch_size == 0 || self.spent_check_batch_size == 0 {
            return Err(ConfigError::Invalid("batch sizes must be at least 1".to_string()));
        }

        if self.aggregator_url.is_empty() {
            return Err(ConfigError::Invalid("aggregator_url must not be empty".to_string()));
        }

        let leader = &self.leader;
        if leader.leader_timeout_ms <= leader.heartbeat_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "leader_timeout_ms ({}) must be greater than heartbeat_interval_ms ({})",
                leader.leader_timeout_ms, leader.heartbeat_interval_ms
            )));
        }

        if leader.tick_interval_ms == 0
            || leader.tick_interval_ms > leader.election_timeout_ms
        {
            return Err(ConfigError::Invalid(format!(
                "tick_interval_ms ({}) must be in 1..=election_timeout_ms ({})",
                leader.tick_interval_ms, leader.election_timeout_ms
            )));
        }

        Ok(())
    }
}
