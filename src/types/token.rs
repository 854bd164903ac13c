// Token - TXF token format and the wallet-level token wrapper
// Principle: the committed prefix of a transition chain is immutable

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

// =============================================================================
// INCLUSION PROOFS
// =============================================================================

/// Aggregator signature over an accepted state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authenticator {
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub signature: String,
    pub state_hash: String,
}

/// Proof returned by the aggregator for a state hash / request id
///
/// A proof whose `authenticator` is `null` is an exclusion proof: evidence that
/// the state was *not* accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    pub authenticator: Option<Authenticator>,
    #[serde(default)]
    pub merkle_tree_path: Option<Value>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub unicity_certificate: Option<Value>,
}

impl InclusionProof {
    /// Is this an exclusion proof (no authenticator)?
    pub fn is_exclusion(&self) -> bool {
        self.authenticator.is_none()
    }
}

// =============================================================================
// GENESIS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxfGenesisData {
    pub token_id: String,
    pub token_type: String,
    /// `[[coinId, amount], ...]`
    #[serde(default)]
    pub coin_data: Option<Value>,
    #[serde(default)]
    pub token_data: Option<String>,
    #[serde(default)]
    pub salt: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub recipient_data_hash: Option<String>,
    /// Set on split tokens: references the burn of the parent token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxfGenesis {
    pub data: TxfGenesisData,
    pub inclusion_proof: Option<InclusionProof>,
}

// =============================================================================
// STATE & TRANSITIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxfState {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub predicate: Value,
}

/// One state transition; uncommitted while `inclusion_proof` is `None`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxfTransaction {
    pub previous_state_hash: String,
    pub new_state_hash: String,
    #[serde(default)]
    pub predicate: Value,
    pub inclusion_proof: Option<InclusionProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TxfTransaction {
    pub fn is_committed(&self) -> bool {
        self.inclusion_proof.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxfIntegrity {
    pub genesis_data_hash: String,
}

// =============================================================================
// TXF TOKEN
// =============================================================================

/// Canonical serialized token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxfToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub genesis: TxfGenesis,
    pub state: TxfState,
    #[serde(default)]
    pub transactions: Vec<TxfTransaction>,
    #[serde(default)]
    pub nametags: Vec<Value>,
    #[serde(rename = "_integrity", default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<TxfIntegrity>,
}

impl TxfToken {
    pub fn token_id(&self) -> &str {
        &self.genesis.data.token_id
    }

    /// State hash accepted at genesis, if the genesis proof carries one
    pub fn genesis_state_hash(&self) -> Option<&str> {
        self.genesis
            .inclusion_proof
            .as_ref()
            .and_then(|p| p.authenticator.as_ref())
            .map(|a| a.state_hash.as_str())
    }

    /// Source state of transition `tx_index`: the previous transition's new
    /// state, or the genesis state for index 0
    pub fn source_state_hash(&self, tx_index: usize) -> Option<&str> {
        if tx_index == 0 {
            self.genesis_state_hash()
        } else {
            self.transactions
                .get(tx_index - 1)
                .map(|tx| tx.new_state_hash.as_str())
        }
    }

    /// Hash of the current (tip) state
    pub fn current_state_hash(&self) -> Option<&str> {
        self.source_state_hash(self.transactions.len())
    }

    pub fn uncommitted_count(&self) -> usize {
        self.transactions.iter().filter(|tx| !tx.is_committed()).count()
    }

    pub fn has_uncommitted(&self) -> bool {
        self.transactions.iter().any(|tx| !tx.is_committed())
    }

    /// Index of the first uncommitted transition, if any
    pub fn first_uncommitted_index(&self) -> Option<usize> {
        self.transactions.iter().position(|tx| !tx.is_committed())
    }

    /// Committed transitions must form a prefix of the chain
    pub fn has_committed_prefix(&self) -> bool {
        match self.first_uncommitted_index() {
            Some(first) => self.transactions[first..].iter().all(|tx| !tx.is_committed()),
            None => true,
        }
    }

    /// Copy of this token as it stood before transition `tx_index`
    pub fn truncated(&self, tx_index: usize) -> TxfToken {
        let mut copy = self.clone();
        copy.transactions.truncate(tx_index);
        copy
    }

    /// SHA-256 hex of the canonical JSON encoding of the genesis data
    pub fn compute_genesis_data_hash(&self) -> String {
        let encoded = serde_json::to_vec(&self.genesis.data).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }

    /// Fill in the `_integrity` record from the current genesis data
    pub fn seal_integrity(&mut self) {
        self.integrity = Some(TxfIntegrity {
            genesis_data_hash: self.compute_genesis_data_hash(),
        });
    }
}

// =============================================================================
// WALLET TOKEN
// =============================================================================

/// Lifecycle status of a wallet token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    #[default]
    Confirmed,
    Pending,
    Transferring,
    Burned,
    Invalid,
}

/// Token as held by the wallet: a local id plus the serialized TXF payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Local identifier (unique per wallet replica)
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Serialized `TxfToken`
    #[serde(default)]
    pub json_data: Option<String>,
    #[serde(default)]
    pub status: TokenStatus,
    /// Unix timestamp in milliseconds
    #[serde(default)]
    pub timestamp: u64,
}

impl Token {
    pub fn new(id: impl Into<String>, json_data: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            json_data,
            status: TokenStatus::Confirmed,
            timestamp: 0,
        }
    }

    /// Wrap a TXF token, using its token id as the local id
    pub fn from_txf(txf: &TxfToken) -> Self {
        Self::new(
            txf.token_id().to_string(),
            serde_json::to_string(txf).ok(),
        )
    }

    /// Parse the TXF payload, if any
    pub fn txf(&self) -> Option<TxfToken> {
        self.json_data
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
    }

    /// Token id from the payload, falling back to the local id
    pub fn token_id(&self) -> String {
        self.txf()
            .map(|t| t.token_id().to_string())
            .unwrap_or_else(|| self.id.clone())
    }
}
