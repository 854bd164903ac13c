// Split tokens - Burn-reference checks for tokens minted from a split
use serde_json::Value;
use tracing::{debug, warn};

use super::TokenValidator;
use crate::aggregator::fetch_proof_lenient;
use crate::types::{InvalidSplitToken, SplitValidationResult, Token};

const SPLIT_MINT_PREFIX: &str = "SPLIT_MINT:";

/// State of a parent burn transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BurnStatus {
    Committed,
    NotCommitted,
    /// The question could not be answered; the split token is kept
    Unverifiable(String),
}

/// Extract the burn transaction hash from a genesis `reason`
///
/// Accepts `"SPLIT_MINT:<hash>"`, `{"splitMintReason":{"burnTransactionHash"}}`,
/// `{"burnTransactionHash"}`, and both objects embedded as a JSON string.
pub fn parse_burn_reference(reason: &Value) -> Option<String> {
    match reason {
        Value::String(s) => {
            if let Some(hash) = s.strip_prefix(SPLIT_MINT_PREFIX) {
                let hash = hash.trim();
                return (!hash.is_empty()).then(|| hash.to_string());
            }
            match serde_json::from_str::<Value>(s) {
                Ok(embedded @ Value::Object(_)) => parse_burn_reference(&embedded),
                _ => None,
            }
        }
        Value::Object(map) => map
            .get("splitMintReason")
            .and_then(|r| r.get("burnTransactionHash"))
            .or_else(|| map.get("burnTransactionHash"))
            .and_then(Value::as_str)
            .filter(|hash| !hash.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

impl TokenValidator {
    /// Has the burn `burn_tx_hash` been committed by the aggregator?
    ///
    /// Only a missing trust base is unverifiable; an unreachable aggregator
    /// reads as "no proof yet" like any other proof lookup.
    pub async fn check_burn_transaction_committed(&self, burn_tx_hash: &str) -> BurnStatus {
        if self.trust_base().await.is_none() {
            return BurnStatus::Unverifiable("trust base unavailable".to_string());
        }

        match fetch_proof_lenient(self.proofs.as_ref(), burn_tx_hash).await {
            Some(proof) if !proof.is_exclusion() => BurnStatus::Committed,
            _ => BurnStatus::NotCommitted,
        }
    }

    /// Partition split tokens by whether their parent burn is committed
    ///
    /// Tokens without a burn reference are not split tokens and stay valid.
    pub async fn validate_split_tokens(&self, tokens: &[Token]) -> SplitValidationResult {
        let mut result = SplitValidationResult::default();

        for token in tokens {
            let burn_hash = token
                .txf()
                .and_then(|txf| txf.genesis.data.reason.clone())
                .and_then(|reason| parse_burn_reference(&reason));

            let Some(burn_hash) = burn_hash else {
                result.valid.push(token.clone());
                continue;
            };

            match self.check_burn_transaction_committed(&burn_hash).await {
                BurnStatus::Committed => {
                    debug!("Split token {} backed by burn {}", token.id, burn_hash);
                    result.valid.push(token.clone());
                }
                BurnStatus::NotCommitted => {
                    warn!("✂️ Split token {}: burn {} not committed", token.id, burn_hash);
                    result.invalid.push(InvalidSplitToken {
                        token: token.clone(),
                        reason: format!(
                            "burn transaction {} not committed, may be pending or rejected",
                            burn_hash
                        ),
                    });
                }
                BurnStatus::Unverifiable(reason) => {
                    result.errors.push(format!(
                        "{}: burn {} unverifiable ({})",
                        token.id, burn_hash, reason
                    ));
                    result.valid.push(token.clone());
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{validator, MockProofSource};
    use crate::types::token::fixtures::{proof_for, txf_token};
    use serde_json::json;
    use std::sync::Arc;

    fn split_token(id: &str, reason: Value) -> Token {
        let mut txf = txf_token(id, 0, 0);
        txf.genesis.data.reason = Some(reason);
        txf.seal_integrity();
        Token::from_txf(&txf)
    }

    #[test]
    fn test_burn_reference_forms() {
        assert_eq!(parse_burn_reference(&json!("SPLIT_MINT:ab12")), Some("ab12".to_string()));
        assert_eq!(
            parse_burn_reference(&json!({ "splitMintReason": { "burnTransactionHash": "cd34" } })),
            Some("cd34".to_string())
        );
        assert_eq!(
            parse_burn_reference(&json!({ "burnTransactionHash": "ef56" })),
            Some("ef56".to_string())
        );
        assert_eq!(
            parse_burn_reference(&json!(r#"{"splitMintReason":{"burnTransactionHash":"0a"}}"#)),
            Some("0a".to_string())
        );
        assert_eq!(parse_burn_reference(&json!("gift")), None);
        assert_eq!(parse_burn_reference(&json!("SPLIT_MINT:")), None);
        assert_eq!(parse_burn_reference(&json!(7)), None);
    }

    #[tokio::test]
    async fn test_uncommitted_burn_invalidates_split() {
        let v = validator(Arc::new(MockProofSource::new()), None, true);
        let result = v
            .validate_split_tokens(&[split_token("aa01", json!("SPLIT_MINT:deadbeef"))])
            .await;

        assert!(result.valid.is_empty());
        assert_eq!(result.invalid.len(), 1);
        assert!(result.invalid[0].reason.contains("not committed"));
        assert!(result.invalid[0].reason.contains("pending or rejected"));
    }

    #[tokio::test]
    async fn test_committed_burn_and_plain_tokens_pass() {
        let proofs = Arc::new(MockProofSource::new());
        proofs.insert("beef", proof_for("beef"));
        let v = validator(proofs, None, true);

        let tokens = [
            split_token("aa01", json!({ "burnTransactionHash": "beef" })),
            Token::from_txf(&txf_token("bb02", 0, 0)),
        ];
        let result = v.validate_split_tokens(&tokens).await;
        assert_eq!(result.valid.len(), 2);
        assert!(result.invalid.is_empty());
    }

    #[tokio::test]
    async fn test_missing_trust_base_keeps_split_tokens() {
        let no_trust_base = validator(Arc::new(MockProofSource::new()), None, false);
        let result = no_trust_base
            .validate_split_tokens(&[split_token("aa01", json!("SPLIT_MINT:beef"))])
            .await;
        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("trust base unavailable"));
    }

    #[tokio::test]
    async fn test_unreachable_aggregator_reads_as_uncommitted_burn() {
        let proofs = Arc::new(MockProofSource::new());
        proofs.fail_all();
        let offline = validator(proofs, None, true);

        assert_eq!(
            offline.check_burn_transaction_committed("beef").await,
            BurnStatus::NotCommitted
        );
        let result = offline
            .validate_split_tokens(&[split_token("aa01", json!("SPLIT_MINT:beef"))])
            .await;
        assert!(result.valid.is_empty());
        assert_eq!(result.invalid.len(), 1);
        assert!(result.invalid[0].reason.contains("may be pending or rejected"));
        assert!(result.errors.is_empty());
    }
}
