// Spent checks - Current-state spent status of whole inventories
// Principle: an inconclusive check counts as unspent
use futures::future::join_all;
use std::collections::HashSet;
use tracing::{info, warn};

use super::{BatchOptions, TokenValidator};
use crate::types::{SpentCheckResult, SpentTokenInfo, Token};
use crate::verifier::{TrustBase, Verifier};

impl TokenValidator {
    /// Find tokens whose current state the aggregator reports as spent by
    /// `public_key`
    pub async fn check_spent_tokens(
        &self,
        tokens: &[Token],
        public_key: &[u8],
        options: BatchOptions<'_>,
    ) -> SpentCheckResult {
        let mut result = SpentCheckResult::default();
        let total = tokens.len();

        let Some(verifier) = self.verifier.as_deref() else {
            result.errors = unavailable(tokens, "verifier unavailable");
            return result;
        };
        let Some(trust_base) = self.trust_base().await else {
            result.errors = unavailable(tokens, "trust base unavailable");
            return result;
        };

        let batch_size = options.batch_size.unwrap_or(self.spent_check_batch_size).max(1);
        let mut completed = 0usize;

        for batch in tokens.chunks(batch_size) {
            let checks = batch
                .iter()
                .map(|token| check_one(verifier, &trust_base, token, public_key));

            for outcome in join_all(checks).await {
                match outcome {
                    Ok(Some(info)) => result.spent_tokens.push(info),
                    Ok(None) => {}
                    Err(e) => result.errors.push(e),
                }
            }

            completed += batch.len();
            options.report(completed, total);
        }

        if !result.spent_tokens.is_empty() {
            info!("🪦 {} of {} token(s) already spent", result.spent_tokens.len(), total);
        }
        result
    }

    /// Local ids of the tokens not proven spent
    pub async fn check_unspent_tokens(&self, tokens: &[Token], public_key: &[u8]) -> Vec<String> {
        let spent = self
            .check_spent_tokens(tokens, public_key, BatchOptions::default())
            .await;
        let spent_ids: HashSet<&str> =
            spent.spent_tokens.iter().map(|s| s.local_id.as_str()).collect();

        tokens
            .iter()
            .filter(|token| !spent_ids.contains(token.id.as_str()))
            .map(|token| token.id.clone())
            .collect()
    }
}

/// One inconclusive entry per token
fn unavailable(tokens: &[Token], reason: &str) -> Vec<String> {
    tokens
        .iter()
        .map(|token| format!("{}: {}", token.id, reason))
        .collect()
}

async fn check_one(
    verifier: &dyn Verifier,
    trust_base: &TrustBase,
    token: &Token,
    public_key: &[u8],
) -> Result<Option<SpentTokenInfo>, String> {
    let txf = token
        .txf()
        .ok_or_else(|| format!("{}: no readable TXF payload", token.id))?;
    let state_hash = txf
        .current_state_hash()
        .ok_or_else(|| format!("{}: no current state hash", token.id))?
        .to_string();

    match verifier.is_token_state_spent(trust_base, &txf, public_key).await {
        Ok(true) => Ok(Some(SpentTokenInfo {
            token_id: txf.token_id().to_string(),
            local_id: token.id.clone(),
            state_hash,
        })),
        Ok(false) => Ok(None),
        Err(e) => {
            warn!("Spent check for {} inconclusive: {}", token.id, e);
            Err(format!("{}: {}", token.id, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{
        validator, MockProofSource, MockVerifier, SpentAnswer, IDENTITY_KEY,
    };
    use crate::types::token::fixtures::{txf_token, wallet_token};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_spent_tokens_are_reported() {
        let spent = txf_token("aa01", 1, 1);
        let verifier = Arc::new(MockVerifier::new(SpentAnswer::Unspent));
        verifier.answer(spent.current_state_hash().unwrap(), SpentAnswer::Spent);
        let v = validator(Arc::new(MockProofSource::new()), Some(verifier), true);

        let tokens = vec![Token::from_txf(&spent), wallet_token("bb02", 0, 0)];
        let result = v.check_spent_tokens(&tokens, &IDENTITY_KEY, BatchOptions::default()).await;

        assert_eq!(result.spent_tokens.len(), 1);
        assert_eq!(result.spent_tokens[0].token_id, "aa01");
        assert_eq!(
            result.spent_tokens[0].state_hash,
            spent.current_state_hash().unwrap()
        );
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_inconclusive_checks_count_as_unspent() {
        let v = validator(
            Arc::new(MockProofSource::new()),
            Some(Arc::new(MockVerifier::new(SpentAnswer::Error))),
            true,
        );
        let tokens = vec![wallet_token("aa01", 0, 0), Token::new("local", None)];

        let result = v.check_spent_tokens(&tokens, &IDENTITY_KEY, BatchOptions::default()).await;
        assert!(result.spent_tokens.is_empty());
        assert_eq!(result.errors.len(), 2);

        let unspent = v.check_unspent_tokens(&tokens, &IDENTITY_KEY).await;
        assert_eq!(unspent, vec!["aa01".to_string(), "local".to_string()]);
    }

    #[tokio::test]
    async fn test_spent_check_batches_of_three() {
        let verifier = Arc::new(MockVerifier::new(SpentAnswer::Unspent));
        let v = validator(Arc::new(MockProofSource::new()), Some(verifier.clone()), true);
        let tokens: Vec<Token> =
            (0..7).map(|i| wallet_token(&format!("{:04x}", i), 0, 0)).collect();

        let progress = Mutex::new(Vec::new());
        let on_progress =
            |completed: usize, _total: usize| progress.lock().unwrap().push(completed);
        v.check_spent_tokens(
            &tokens,
            &IDENTITY_KEY,
            BatchOptions::default().with_progress(&on_progress),
        )
        .await;

        assert_eq!(*progress.lock().unwrap(), vec![3, 6, 7]);
        assert_eq!(verifier.spent_calls(), 7);
    }

    #[tokio::test]
    async fn test_no_trust_base_finds_nothing_spent() {
        let v = validator(
            Arc::new(MockProofSource::new()),
            Some(Arc::new(MockVerifier::new(SpentAnswer::Spent))),
            false,
        );
        let tokens = vec![wallet_token("aa01", 0, 0)];

        let result = v.check_spent_tokens(&tokens, &IDENTITY_KEY, BatchOptions::default()).await;
        assert!(result.spent_tokens.is_empty());
        assert_eq!(result.errors, vec!["aa01: trust base unavailable".to_string()]);
        assert_eq!(v.check_unspent_tokens(&tokens, &IDENTITY_KEY).await, vec!["aa01".to_string()]);
    }
}
