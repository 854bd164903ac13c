// Validation - Token validator: classification against the aggregator
// Principle: recommend, never mutate; ambiguity resolves toward keeping data

mod pending;
mod spent;
mod split;

pub use split::{parse_burn_reference, BurnStatus};

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregator::{fetch_proof_lenient, ProofSource};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::types::{
    BatchValidationResult, Token, TxfToken, ValidationFailure, ValidationIssue, ValidationResult,
    VerificationOutcome,
};
use crate::verifier::{TrustBase, TrustBaseCache, TrustBaseProvider, Verifier};

/// Progress callback: `(completed, total)`
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Batch tuning for the bulk operations
#[derive(Clone, Copy, Default)]
pub struct BatchOptions<'a> {
    /// Overrides the configured batch size
    pub batch_size: Option<usize>,
    /// Called once per finished batch with the cumulative count
    pub on_progress: Option<ProgressFn<'a>>,
}

impl<'a> BatchOptions<'a> {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressFn<'a>) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    fn report(&self, completed: usize, total: usize) {
        if let Some(on_progress) = self.on_progress {
            on_progress(completed, total);
        }
    }
}

/// Classifies tokens and pending transitions
pub struct TokenValidator {
    proofs: Arc<dyn ProofSource>,
    verifier: Option<Arc<dyn Verifier>>,
    trust_base: TrustBaseCache,
    identity: Option<Vec<u8>>,
    clock: Arc<dyn Clock>,
    trust_base_ttl: Duration,
    validation_batch_size: usize,
    spent_check_batch_size: usize,
}

impl TokenValidator {
    /// Validator without verifier, trust base or identity; add them with the
    /// `with_*` builders
    pub fn new(proofs: Arc<dyn ProofSource>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        let trust_base_ttl = config.trust_base_ttl();
        Self {
            proofs,
            verifier: None,
            trust_base: TrustBaseCache::new(None, clock.clone(), trust_base_ttl),
            identity: None,
            clock,
            trust_base_ttl,
            validation_batch_size: config.validation_batch_size.max(1),
            spent_check_batch_size: config.spent_check_batch_size.max(1),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_trust_base_provider(mut self, provider: Arc<dyn TrustBaseProvider>) -> Self {
        self.trust_base =
            TrustBaseCache::new(Some(provider), self.clock.clone(), self.trust_base_ttl);
        self
    }

    /// Public key of the local wallet identity
    pub fn with_identity(mut self, public_key: Vec<u8>) -> Self {
        self.identity = Some(public_key);
        self
    }

    pub fn identity(&self) -> Option<&[u8]> {
        self.identity.as_deref()
    }

    pub(crate) async fn trust_base(&self) -> Option<Arc<TrustBase>> {
        self.trust_base.get().await
    }

    // =========================================================================
    // SINGLE TOKEN
    // =========================================================================

    /// Validate one wallet token
    pub async fn validate_token(&self, token: &Token) -> ValidationResult {
        let Some(json) = token.json_data.as_deref() else {
            return ValidationResult::invalid(ValidationFailure::NoJsonData);
        };

        let value: Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => {
                return ValidationResult::invalid(ValidationFailure::InvalidJson(e.to_string()))
            }
        };

        if value.get("genesis").is_none() || value.get("state").is_none() {
            return ValidationResult::invalid(ValidationFailure::MissingTxfFields);
        }

        let txf: TxfToken = match serde_json::from_value(value) {
            Ok(txf) => txf,
            Err(e) => {
                return ValidationResult::invalid(ValidationFailure::InvalidJson(e.to_string()))
            }
        };

        if txf.has_uncommitted() {
            return match self.fetch_missing_proofs(&txf).await {
                Some(patched) => {
                    debug!(
                        "Token {} patched ({} still pending)",
                        txf.token_id(),
                        patched.uncommitted_count()
                    );
                    let mut updated = token.clone();
                    updated.json_data = serde_json::to_string(&patched).ok();
                    ValidationResult::accept(updated, VerificationOutcome::Skipped)
                }
                None => ValidationResult::invalid(ValidationFailure::UncommittedTransactions {
                    remaining: txf.uncommitted_count(),
                }),
            };
        }

        let verification = self.verify_optional(&txf).await;
        ValidationResult::accept(token.clone(), verification)
    }

    /// Advisory verification; the outcome never invalidates the token
    async fn verify_optional(&self, txf: &TxfToken) -> VerificationOutcome {
        let Some(verifier) = &self.verifier else {
            return VerificationOutcome::Skipped;
        };
        let Some(trust_base) = self.trust_base.get().await else {
            return VerificationOutcome::Skipped;
        };

        match verifier.verify(&trust_base, txf).await {
            Ok(()) => VerificationOutcome::Passed,
            Err(e) => {
                warn!("⚠️ Verification of token {} failed: {}", txf.token_id(), e);
                VerificationOutcome::Failed
            }
        }
    }

    /// Ask the aggregator for proofs of every uncommitted transition
    ///
    /// Transitions are queried index ascending and the walk stops at the first
    /// one without a proof, so patched tokens keep a committed prefix.
    /// Exclusion proofs do not commit anything. Returns `None` unless at least
    /// one proof was patched in.
    pub async fn fetch_missing_proofs(&self, token: &TxfToken) -> Option<TxfToken> {
        let first = token.first_uncommitted_index()?;
        let mut patched = token.clone();
        let mut found = 0usize;

        for tx in patched.transactions[first..].iter_mut() {
            match fetch_proof_lenient(self.proofs.as_ref(), &tx.new_state_hash).await {
                Some(proof) if !proof.is_exclusion() => {
                    tx.inclusion_proof = Some(proof);
                    found += 1;
                }
                _ => break,
            }
        }

        if found == 0 {
            return None;
        }

        debug!("Fetched {} missing proof(s) for token {}", found, token.token_id());
        Some(patched)
    }

    // =========================================================================
    // BATCH
    // =========================================================================

    /// Validate many tokens, `batch_size` at a time
    pub async fn validate_all_tokens(
        &self,
        tokens: &[Token],
        options: BatchOptions<'_>,
    ) -> BatchValidationResult {
        let batch_size = options.batch_size.unwrap_or(self.validation_batch_size).max(1);
        let total = tokens.len();
        let mut result = BatchValidationResult::default();
        let mut completed = 0usize;

        info!("🔍 Validating {} token(s) in batches of {}", total, batch_size);

        for batch in tokens.chunks(batch_size) {
            let verdicts = join_all(batch.iter().map(|token| self.validate_token(token))).await;

            for (token, verdict) in batch.iter().zip(verdicts) {
                if verdict.is_valid {
                    if verdict.verification != VerificationOutcome::Passed {
                        result.unverified += 1;
                    }
                    result
                        .valid_tokens
                        .push(verdict.token.unwrap_or_else(|| token.clone()));
                } else {
                    result.issues.push(ValidationIssue {
                        token_id: token.token_id(),
                        reason: verdict.reason.unwrap_or_default(),
                        failure: verdict.failure,
                    });
                }
            }

            completed += batch.len();
            options.report(completed, total);
        }

        info!(
            "✅ Validation done: {} valid, {} issue(s)",
            result.valid_tokens.len(),
            result.issues.len()
        );
        result
    }
}
