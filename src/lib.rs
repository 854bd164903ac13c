//! TXF Token Inventory Engine
//!
//! Keeps a wallet's local token replica eventually consistent with the
//! aggregator while several client instances share it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   INVENTORY SYNC PASS                    │
//! ├──────────────────────────────────────────────────────────┤
//! │  LeaderCoordinator  ←── election + sync lock over a bus  │
//! │  Serialization      ←── flat key namespace of a replica  │
//! │  TokenValidator     ←── ACCEPT / RETRY_LATER / DISCARD   │
//! │  AggregatorClient   ←── getInclusionProof JSON-RPC       │
//! │  CircuitBreaker     ←── local mode on repeated conflicts │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Ambiguity (network failure, missing trust base) never discards data; only
//! a positive spent-proof from the aggregator does.

pub mod aggregator;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod inventory;
pub mod leader;
pub mod serialization;
pub mod storage;
pub mod types;
pub mod validation;
pub mod verifier;

#[cfg(test)]
mod tests;

pub use config::EngineConfig;
pub use inventory::{InventorySync, SyncError, SyncReport, SyncStatus};
pub use leader::LeaderCoordinator;
pub use validation::TokenValidator;
