// Validation - Verdicts issued by the token validator
use serde::{Deserialize, Serialize};
use std::fmt;

use super::token::Token;

/// Disposition of a token or pending transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationAction {
    /// Usable as-is
    Accept,
    /// Undecidable right now (verifier unavailable, network failure)
    RetryLater,
    /// Provably dead: the source state was spent by another committed transition
    DiscardFork,
}

impl fmt::Display for ValidationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationAction::Accept => write!(f, "ACCEPT"),
            ValidationAction::RetryLater => write!(f, "RETRY_LATER"),
            ValidationAction::DiscardFork => write!(f, "DISCARD_FORK"),
        }
    }
}

/// Why a token failed validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("no jsonData")]
    NoJsonData,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("missing TXF fields")]
    MissingTxfFields,

    #[error("{remaining} uncommitted transaction(s) without inclusion proof")]
    UncommittedTransactions { remaining: usize },
}

impl ValidationFailure {
    /// Malformed payload: retrying will not help
    pub fn is_structural(&self) -> bool {
        !matches!(self, ValidationFailure::UncommittedTransactions { .. })
    }
}

/// Outcome of the optional trust-base verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerificationOutcome {
    Passed,
    Failed,
    /// No trust base or verifier available, or the token had pending state
    #[default]
    Skipped,
}

/// Result of validating a single token
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Replacement token (e.g. with freshly fetched proofs)
    pub token: Option<Token>,
    pub reason: Option<String>,
    pub action: ValidationAction,
    pub failure: Option<ValidationFailure>,
    pub verification: VerificationOutcome,
}

impl ValidationResult {
    pub fn accept(token: Token, verification: VerificationOutcome) -> Self {
        Self {
            is_valid: true,
            token: Some(token),
            reason: None,
            action: ValidationAction::Accept,
            failure: None,
            verification,
        }
    }

    /// Invalid results never recommend discarding; the failure kind tells the
    /// caller whether the payload itself is broken
    pub fn invalid(failure: ValidationFailure) -> Self {
        Self {
            is_valid: false,
            token: None,
            reason: Some(failure.to_string()),
            action: ValidationAction::RetryLater,
            failure: Some(failure),
            verification: VerificationOutcome::Skipped,
        }
    }
}

/// A token that could not be validated
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub token_id: String,
    pub reason: String,
    pub failure: Option<ValidationFailure>,
}

/// Result of validating a batch of tokens
#[derive(Debug, Clone, Default)]
pub struct BatchValidationResult {
    pub valid_tokens: Vec<Token>,
    pub issues: Vec<ValidationIssue>,
    /// Valid tokens whose verification did not pass
    pub unverified: usize,
}

/// Result of checking whether a pending transition can still be submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittableCheck {
    pub submittable: bool,
    pub reason: Option<String>,
    pub action: ValidationAction,
}

impl SubmittableCheck {
    pub fn accept() -> Self {
        Self {
            submittable: true,
            reason: None,
            action: ValidationAction::Accept,
        }
    }

    pub fn retry_later(reason: impl Into<String>) -> Self {
        Self {
            submittable: false,
            reason: Some(reason.into()),
            action: ValidationAction::RetryLater,
        }
    }

    pub fn discard_fork(reason: impl Into<String>) -> Self {
        Self {
            submittable: false,
            reason: Some(reason.into()),
            action: ValidationAction::DiscardFork,
        }
    }
}

/// A pending transition proven dead
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadTransaction {
    pub index: usize,
    pub reason: String,
}

/// Audit of every uncommitted transition of one token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingTransactionsReport {
    pub pending_count: usize,
    pub submittable: usize,
    pub dead: usize,
    pub dead_transactions: Vec<DeadTransaction>,
}

/// A split token rejected because its parent burn is not committed
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidSplitToken {
    pub token: Token,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SplitValidationResult {
    pub valid: Vec<Token>,
    pub invalid: Vec<InvalidSplitToken>,
    pub errors: Vec<String>,
}

/// Token whose current state the aggregator reports as spent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpentTokenInfo {
    pub token_id: String,
    pub local_id: String,
    pub state_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct SpentCheckResult {
    pub spent_tokens: Vec<SpentTokenInfo>,
    pub errors: Vec<String>,
}
