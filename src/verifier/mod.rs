// Verifier - State-transition verification capability
// Principle: absence of a verifier is a typed state, never a runtime guess

mod trust_base;

pub use trust_base::{
    FileTrustBaseProvider, RootNode, StaticTrustBaseProvider, TrustBase, TrustBaseCache,
    TrustBaseProvider,
};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::aggregator::{AggregatorError, ProofSource};
use crate::types::TxfToken;

/// Verifier errors
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("Aggregator unavailable: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("Token has no current state hash")]
    MissingStateHash,

    #[error("Invalid hex in {field}: {value}")]
    InvalidHex { field: &'static str, value: String },

    #[error("Integrity mismatch: expected {expected}, computed {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Invalid token structure: {0}")]
    Structure(String),
}

/// State-transition verification client
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Has the token's current state already been spent by `public_key`'s owner?
    async fn is_token_state_spent(
        &self,
        trust_base: &TrustBase,
        token: &TxfToken,
        public_key: &[u8],
    ) -> Result<bool, VerifierError>;

    /// Structural / cryptographic check of the whole token
    async fn verify(&self, trust_base: &TrustBase, token: &TxfToken) -> Result<(), VerifierError>;
}

/// Request id under which the aggregator records a spend of `state_hash`
///
/// `SHA-256(public_key || state_hash_bytes)`, hex encoded.
pub fn request_id(public_key: &[u8], state_hash: &str) -> Result<String, VerifierError> {
    let state_bytes = hex::decode(state_hash).map_err(|_| VerifierError::InvalidHex {
        field: "stateHash",
        value: state_hash.to_string(),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(public_key);
    hasher.update(&state_bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Verifier backed by the aggregator proof RPC
pub struct AggregatorVerifier {
    proofs: Arc<dyn ProofSource>,
}

impl AggregatorVerifier {
    pub fn new(proofs: Arc<dyn ProofSource>) -> Self {
        Self { proofs }
    }
}

#[async_trait]
impl Verifier for AggregatorVerifier {
    async fn is_token_state_spent(
        &self,
        _trust_base: &TrustBase,
        token: &TxfToken,
        public_key: &[u8],
    ) -> Result<bool, VerifierError> {
        let state_hash = token
            .current_state_hash()
            .ok_or(VerifierError::MissingStateHash)?;
        let request_id = request_id(public_key, state_hash)?;

        // Inclusion proof => a transition out of this state was accepted
        let proof = self.proofs.get_inclusion_proof(&request_id).await?;
        let spent = matches!(proof, Some(ref p) if !p.is_exclusion());

        debug!(
            "State {} of token {} is {}",
            state_hash,
            token.token_id(),
            if spent { "spent" } else { "unspent" }
        );
        Ok(spent)
    }

    async fn verify(&self, trust_base: &TrustBase, token: &TxfToken) -> Result<(), VerifierError> {
        if let Some(integrity) = &token.integrity {
            let actual = token.compute_genesis_data_hash();
            if integrity.genesis_data_hash != actual {
                return Err(VerifierError::IntegrityMismatch {
                    expected: integrity.genesis_data_hash.clone(),
                    actual,
                });
            }
        }

        if token.genesis_state_hash().is_none() {
            return Err(VerifierError::Structure("genesis is not committed".to_string()));
        }

        if !token.has_committed_prefix() {
            return Err(VerifierError::Structure(
                "committed transactions do not form a prefix".to_string(),
            ));
        }

        for (index, tx) in token.transactions.iter().enumerate() {
            let source = token.source_state_hash(index).unwrap_or_default();
            if tx.previous_state_hash != source {
                return Err(VerifierError::Structure(format!(
                    "transaction {} does not spend the preceding state",
                    index
                )));
            }

            if let Some(proof) = &tx.inclusion_proof {
                if proof.is_exclusion() {
                    return Err(VerifierError::Structure(format!(
                        "transaction {} carries an exclusion proof",
                        index
                    )));
                }
            }
        }

        if trust_base.root_nodes.is_empty() {
            debug!(
                "Trust base epoch {} has no root nodes; signature check skipped",
                trust_base.epoch
            );
        }

        Ok(())
    }
}
