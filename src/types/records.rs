// Records - Auxiliary replica records (tombstones, outbox, archives)
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::token::TxfToken;

/// Current storage format version
pub const TXF_FORMAT_VERSION: &str = "2.0";

/// Permanent marker: this state of this token was spent
///
/// Tombstones are append-only and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub token_id: String,
    pub state_hash: String,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl Tombstone {
    pub fn new(token_id: impl Into<String>, state_hash: impl Into<String>, timestamp: u64) -> Self {
        Self {
            token_id: token_id.into(),
            state_hash: state_hash.into(),
            timestamp,
        }
    }

    pub fn matches(&self, token_id: &str, state_hash: &str) -> bool {
        self.token_id == token_id && self.state_hash == state_hash
    }
}

/// Status of an outgoing transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    PendingIpfsSync,
    ReadyToSubmit,
    Submitted,
    ProofReceived,
    NostrSent,
    Completed,
    Failed,
}

/// Outgoing transfer persisted before it is handed to the aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: String,
    pub status: OutboxStatus,
    pub source_token_id: String,
    pub recipient: String,
    pub amount: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment_json: Option<String>,
}

/// Token handed to another party
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentEntry {
    pub token: TxfToken,
    pub timestamp: u64,
    pub spent_at: u64,
}

/// Token set aside because its payload failed validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidEntry {
    pub token: Value,
    pub reason: String,
    pub detected_at: u64,
}

/// The wallet's registered nametag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NametagData {
    pub name: String,
    pub token: Value,
    #[serde(default)]
    pub timestamp: u64,
}

/// `_meta` record: format version plus arbitrary caller metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxfMeta {
    /// Monotonic replica version, bumped on every write-back
    pub version: u64,
    pub format_version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for TxfMeta {
    fn default() -> Self {
        Self {
            version: 0,
            format_version: TXF_FORMAT_VERSION.to_string(),
            extra: Map::new(),
        }
    }
}
