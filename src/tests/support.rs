// Test support - Scriptable aggregator, verifier and trust base

use async_trait::async_trait;
use serde_json::Map;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::aggregator::{AggregatorError, ProofSource};
use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::types::{InclusionProof, TxfToken};
use crate::validation::TokenValidator;
use crate::verifier::{
    RootNode, StaticTrustBaseProvider, TrustBase, TrustBaseProvider, Verifier, VerifierError,
};

pub const IDENTITY_KEY: [u8; 33] = [2u8; 33];

pub fn sample_trust_base() -> TrustBase {
    TrustBase {
        network_id: 3,
        epoch: 1,
        root_nodes: vec![RootNode {
            node_id: "node-1".to_string(),
            sig_key: "03".repeat(33),
            stake: 1,
        }],
        quorum_threshold: 1,
        extra: Map::new(),
    }
}

pub fn trust_base_provider() -> Arc<dyn TrustBaseProvider> {
    Arc::new(StaticTrustBaseProvider::new(Some(sample_trust_base())))
}

// =============================================================================
// PROOF SOURCE
// =============================================================================

/// In-memory aggregator
#[derive(Default)]
pub struct MockProofSource {
    proofs: Mutex<HashMap<String, InclusionProof>>,
    failing: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    calls: AtomicUsize,
}

impl MockProofSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hash: &str, proof: InclusionProof) {
        self.proofs.lock().unwrap().insert(hash.to_string(), proof);
    }

    /// Make lookups of `hash` fail with a transport error
    pub fn fail_on(&self, hash: &str) {
        self.failing.lock().unwrap().insert(hash.to_string());
    }

    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProofSource for MockProofSource {
    async fn get_inclusion_proof(
        &self,
        state_hash: &str,
    ) -> Result<Option<InclusionProof>, AggregatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let failing = self.failing.lock().unwrap().contains(state_hash);
        if self.fail_all.load(Ordering::SeqCst) || failing {
            return Err(AggregatorError::Network("connection refused".to_string()));
        }
        Ok(self.proofs.lock().unwrap().get(state_hash).cloned())
    }
}

// =============================================================================
// VERIFIER
// =============================================================================

/// Scripted answer of the spent check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpentAnswer {
    Spent,
    Unspent,
    Error,
}

/// Verifier answering spent checks by current state hash
pub struct MockVerifier {
    default_answer: SpentAnswer,
    answers: Mutex<HashMap<String, SpentAnswer>>,
    verify_ok: AtomicBool,
    spent_calls: AtomicUsize,
}

impl MockVerifier {
    pub fn new(default_answer: SpentAnswer) -> Self {
        Self {
            default_answer,
            answers: Mutex::new(HashMap::new()),
            verify_ok: AtomicBool::new(true),
            spent_calls: AtomicUsize::new(0),
        }
    }

    /// Answer for tokens whose current state is `state_hash`
    pub fn answer(&self, state_hash: &str, answer: SpentAnswer) {
        self.answers
            .lock()
            .unwrap()
            .insert(state_hash.to_string(), answer);
    }

    pub fn set_verify_ok(&self, ok: bool) {
        self.verify_ok.store(ok, Ordering::SeqCst);
    }

    pub fn spent_calls(&self) -> usize {
        self.spent_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verifier for MockVerifier {
    async fn is_token_state_spent(
        &self,
        _trust_base: &TrustBase,
        token: &TxfToken,
        _public_key: &[u8],
    ) -> Result<bool, VerifierError> {
        self.spent_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let state = token.current_state_hash().unwrap_or_default().to_string();
        let answer = self
            .answers
            .lock()
            .unwrap()
            .get(&state)
            .copied()
            .unwrap_or(self.default_answer);

        match answer {
            SpentAnswer::Spent => Ok(true),
            SpentAnswer::Unspent => Ok(false),
            SpentAnswer::Error => Err(VerifierError::Aggregator(AggregatorError::Network(
                "timeout".to_string(),
            ))),
        }
    }

    async fn verify(
        &self,
        _trust_base: &TrustBase,
        _token: &TxfToken,
    ) -> Result<(), VerifierError> {
        if self.verify_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VerifierError::Structure("bad signature".to_string()))
        }
    }
}

// =============================================================================
// VALIDATOR FACTORY
// =============================================================================

/// Validator wired to mocks; `None` arguments leave the capability out
pub fn validator(
    proofs: Arc<MockProofSource>,
    verifier: Option<Arc<MockVerifier>>,
    with_trust_base: bool,
) -> TokenValidator {
    let mut validator = TokenValidator::new(
        proofs,
        Arc::new(ManualClock::new(1_700_000_000_000)),
        &EngineConfig::default(),
    )
    .with_identity(IDENTITY_KEY.to_vec());

    if let Some(verifier) = verifier {
        validator = validator.with_verifier(verifier);
    }
    if with_trust_base {
        validator = validator.with_trust_base_provider(trust_base_provider());
    }
    validator
}
