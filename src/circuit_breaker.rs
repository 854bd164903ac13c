// Circuit breaker - Local-mode escalation on repeated conflicts or replication failures
// Principle: counters only grow until a successful recovery resets them

use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;
use crate::types::CircuitBreakerState;

/// Decides when the wallet stops syncing remotely and works locally
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::from_state(CircuitBreakerState::default(), config)
    }

    /// Resume from persisted state
    pub fn from_state(state: CircuitBreakerState, config: CircuitBreakerConfig) -> Self {
        Self { state, config }
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    pub fn is_local_mode(&self) -> bool {
        self.state.local_mode_active
    }

    fn recovery_interval_ms(&self) -> u64 {
        self.config.recovery_interval_secs * 1000
    }

    pub fn record_conflict(&mut self, now_ms: u64) {
        self.state.consecutive_conflicts += 1;
        self.state.last_conflict_timestamp = Some(now_ms);

        if self.state.consecutive_conflicts >= self.config.conflict_threshold {
            self.activate(now_ms, "conflicts");
        }
    }

    pub fn record_ipfs_failure(&mut self, now_ms: u64) {
        self.state.consecutive_ipfs_failures += 1;

        if self.state.consecutive_ipfs_failures >= self.config.ipfs_failure_threshold {
            self.activate(now_ms, "replication failures");
        }
    }

    /// A clean pass: reset the counters and leave local mode
    pub fn record_success(&mut self) {
        if self.state.local_mode_active {
            info!("🔌 Leaving local mode");
        }
        self.state = CircuitBreakerState {
            last_conflict_timestamp: self.state.last_conflict_timestamp,
            ..CircuitBreakerState::default()
        };
    }

    pub fn should_attempt_recovery(&self, now_ms: u64) -> bool {
        self.state.local_mode_active
            && self
                .state
                .next_recovery_attempt
                .map_or(true, |at| now_ms >= at)
    }

    pub fn schedule_recovery(&mut self, now_ms: u64) {
        self.state.next_recovery_attempt = Some(now_ms + self.recovery_interval_ms());
    }

    fn activate(&mut self, now_ms: u64, cause: &str) {
        if self.state.local_mode_active {
            return;
        }
        warn!(
            "🔒 Entering local mode after {} consecutive {}",
            self.state
                .consecutive_conflicts
                .max(self.state.consecutive_ipfs_failures),
            cause
        );
        self.state.local_mode_active = true;
        self.state.local_mode_activated_at = Some(now_ms);
        self.schedule_recovery(now_ms);
    }
}
