// Validator Invariants Tests
// Principle: data is only ever discarded on a positive spent-proof
//
// These tests verify:
// 1. Idempotence of validating an already-valid token
// 2. Monotonic commitment of committed transitions
// 3. Conflict safety: a spent source state is always DISCARD_FORK
// 4. Availability bias: inconclusive checks never yield DISCARD_FORK
// 5. Batch completeness: every token ends up valid or in issues

use proptest::prelude::*;
use serde_json::json;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::tests::support::{validator, MockProofSource, MockVerifier, SpentAnswer};
use crate::types::token::fixtures::{proof_for, txf_token, wallet_token};
use crate::types::{Token, ValidationAction};
use crate::validation::BatchOptions;

// =============================================================================
// TEST HELPERS
// =============================================================================

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// Token with `transitions` transitions of which the first `committed` carry proofs
fn chain() -> impl Strategy<Value = (usize, usize)> {
    (1usize..6).prop_flat_map(|transitions| (Just(transitions), 0..transitions))
}

// =============================================================================
// INVARIANT 1: IDEMPOTENCE
// =============================================================================

mod idempotence {
    use super::*;

    proptest! {
        #[test]
        fn validating_twice_gives_the_same_accept(transitions in 0usize..5) {
            let token = wallet_token("abcd", transitions, transitions);
            let verifier = Arc::new(MockVerifier::new(SpentAnswer::Unspent));
            let v = validator(Arc::new(MockProofSource::new()), Some(verifier), true);

            let (first, second) = block_on(async {
                let first = v.validate_token(&token).await;
                let second = v.validate_token(first.token.as_ref().unwrap()).await;
                (first, second)
            });

            prop_assert_eq!(first.action, ValidationAction::Accept);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.token.unwrap().txf(), token.txf());
        }
    }
}

// =============================================================================
// INVARIANT 2: MONOTONIC COMMITMENT
// =============================================================================

mod monotonic_commitment {
    use super::*;

    proptest! {
        #[test]
        fn committed_transition_stays_accepted(
            (transitions, committed) in chain(),
            answer in prop_oneof![
                Just(SpentAnswer::Spent),
                Just(SpentAnswer::Unspent),
                Just(SpentAnswer::Error)
            ],
            with_trust_base in any::<bool>(),
        ) {
            prop_assume!(committed > 0);
            let token = txf_token("abcd", transitions, committed);
            let v = validator(
                Arc::new(MockProofSource::new()),
                Some(Arc::new(MockVerifier::new(answer))),
                with_trust_base,
            );

            for index in 0..committed {
                for _ in 0..3 {
                    let check = block_on(v.is_pending_transaction_submittable(&token, index));
                    prop_assert_eq!(check.action, ValidationAction::Accept);
                    prop_assert!(check.submittable);
                }
            }
        }
    }
}

// =============================================================================
// INVARIANT 3: CONFLICT SAFETY
// =============================================================================

mod conflict_safety {
    use super::*;

    proptest! {
        #[test]
        fn spent_source_is_always_discarded((transitions, committed) in chain()) {
            let token = txf_token("abcd", transitions, committed);
            let v = validator(
                Arc::new(MockProofSource::new()),
                Some(Arc::new(MockVerifier::new(SpentAnswer::Spent))),
                true,
            );

            for index in committed..transitions {
                let check = block_on(v.is_pending_transaction_submittable(&token, index));
                prop_assert_eq!(check.action, ValidationAction::DiscardFork);
                prop_assert!(!check.submittable);
            }
        }
    }

    #[tokio::test]
    async fn test_report_lists_every_dead_transition() {
        let token = txf_token("abcd", 3, 0);
        let v = validator(
            Arc::new(MockProofSource::new()),
            Some(Arc::new(MockVerifier::new(SpentAnswer::Spent))),
            true,
        );

        let report = v.check_all_pending_transactions(&token).await;
        assert_eq!(report.pending_count, 3);
        assert_eq!(report.dead, 3);
        let indices: Vec<usize> = report.dead_transactions.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}

// =============================================================================
// INVARIANT 4: AVAILABILITY BIAS
// =============================================================================

mod availability_bias {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum Degradation {
        SpentCheckErrors,
        NoTrustBase,
        NoVerifier,
    }

    proptest! {
        #[test]
        fn inconclusive_checks_never_discard(
            (transitions, committed) in chain(),
            degradation in prop_oneof![
                Just(Degradation::SpentCheckErrors),
                Just(Degradation::NoTrustBase),
                Just(Degradation::NoVerifier)
            ],
        ) {
            let token = txf_token("abcd", transitions, committed);
            let proofs = Arc::new(MockProofSource::new());
            let v = match degradation {
                Degradation::SpentCheckErrors => validator(
                    proofs,
                    Some(Arc::new(MockVerifier::new(SpentAnswer::Error))),
                    true,
                ),
                Degradation::NoTrustBase => validator(
                    proofs,
                    Some(Arc::new(MockVerifier::new(SpentAnswer::Spent))),
                    false,
                ),
                Degradation::NoVerifier => validator(proofs, None, true),
            };

            for index in 0..transitions {
                let check = block_on(v.is_pending_transaction_submittable(&token, index));
                prop_assert_ne!(check.action, ValidationAction::DiscardFork);
            }

            let report = block_on(v.check_all_pending_transactions(&token));
            prop_assert_eq!(report.dead, 0);
        }
    }

    #[tokio::test]
    async fn test_aggregator_outage_keeps_tokens() {
        let proofs = Arc::new(MockProofSource::new());
        proofs.fail_all();
        let v = validator(proofs, None, true);

        let token = wallet_token("abcd", 2, 0);
        let result = v.validate_token(&token).await;
        assert!(!result.is_valid);
        assert_eq!(result.action, ValidationAction::RetryLater);
        assert!(!result.failure.unwrap().is_structural());
    }
}

// =============================================================================
// INVARIANT 5: BATCH COMPLETENESS
// =============================================================================

mod batch_completeness {
    use super::*;

    proptest! {
        #[test]
        fn every_token_is_accounted_for(
            kinds in proptest::collection::vec(0u8..3, 0..30),
            batch_size in 1usize..8,
        ) {
            let tokens: Vec<Token> = kinds
                .iter()
                .enumerate()
                .map(|(i, kind)| match kind {
                    0 => wallet_token(&format!("{:04x}", i), 1, 1),
                    1 => wallet_token(&format!("{:04x}", i), 1, 0),
                    _ => Token::new(format!("broken-{}", i), None),
                })
                .collect();
            let v = validator(Arc::new(MockProofSource::new()), None, false);

            let progress = Mutex::new(Vec::new());
            let on_progress = |completed: usize, total: usize| {
                progress.lock().unwrap().push((completed, total));
            };
            let options = BatchOptions::default()
                .with_batch_size(batch_size)
                .with_progress(&on_progress);
            let result = block_on(v.validate_all_tokens(&tokens, options));

            let progress = progress.into_inner().unwrap();
            let n = tokens.len();
            prop_assert_eq!(progress.last().map(|p| p.0).unwrap_or(0), n);
            prop_assert_eq!(progress.len(), (n + batch_size - 1) / batch_size);
            prop_assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
            prop_assert_eq!(result.valid_tokens.len() + result.issues.len(), n);
        }
    }
}

// =============================================================================
// WORKED EXAMPLES
// =============================================================================

mod examples {
    use super::*;

    #[tokio::test]
    async fn test_missing_proof_is_patched_in() {
        let txf = txf_token("abcd", 1, 0);
        let proofs = Arc::new(MockProofSource::new());
        proofs.insert(&txf.transactions[0].new_state_hash, proof_for("next"));
        let v = validator(proofs, None, false);

        let result = v.validate_token(&Token::from_txf(&txf)).await;
        assert!(result.is_valid);
        let patched = result.token.unwrap().txf().unwrap();
        assert!(patched.transactions[0].inclusion_proof.is_some());
    }

    #[tokio::test]
    async fn test_split_token_with_unknown_burn_is_invalid() {
        let mut txf = txf_token("abcd", 0, 0);
        txf.genesis.data.reason = Some(json!("SPLIT_MINT:0badf00d"));
        let v = validator(Arc::new(MockProofSource::new()), None, true);

        let result = v.validate_split_tokens(&[Token::from_txf(&txf)]).await;
        assert_eq!(result.invalid.len(), 1);
        assert!(result.invalid[0].reason.contains("not committed"));
        assert!(result.invalid[0].reason.contains("pending or rejected"));
    }
}
