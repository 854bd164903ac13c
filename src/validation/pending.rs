// Pending transitions - Conflict detection for uncommitted transitions
//
// | Condition                       | Action       |
// |---------------------------------|--------------|
// | transition already has a proof  | ACCEPT       |
// | no trust base                   | RETRY_LATER  |
// | no verifier / identity          | RETRY_LATER  |
// | source state spent              | DISCARD_FORK |
// | source state unspent            | ACCEPT       |
// | spent check errored             | RETRY_LATER  |

use tracing::{debug, warn};

use super::TokenValidator;
use crate::types::{
    DeadTransaction, PendingTransactionsReport, SubmittableCheck, TxfToken, ValidationAction,
};

impl TokenValidator {
    /// Can transition `tx_index` of `token` still be committed?
    pub async fn is_pending_transaction_submittable(
        &self,
        token: &TxfToken,
        tx_index: usize,
    ) -> SubmittableCheck {
        let Some(tx) = token.transactions.get(tx_index) else {
            return SubmittableCheck::retry_later(format!(
                "transaction {} out of range",
                tx_index
            ));
        };

        if tx.is_committed() {
            return SubmittableCheck::accept();
        }

        let Some(source_state) = token.source_state_hash(tx_index) else {
            return SubmittableCheck::retry_later("source state unknown");
        };

        let Some(trust_base) = self.trust_base().await else {
            return SubmittableCheck::retry_later("trust base unavailable");
        };

        let Some(verifier) = &self.verifier else {
            return SubmittableCheck::retry_later("verifier unavailable");
        };

        let Some(public_key) = self.identity() else {
            return SubmittableCheck::retry_later("no identity key");
        };

        // The token as it stood before this transition: its tip is the source state
        let source = token.truncated(tx_index);

        match verifier
            .is_token_state_spent(&trust_base, &source, public_key)
            .await
        {
            Ok(true) => {
                debug!(
                    "Transition {} of token {} is dead: {} already spent",
                    tx_index,
                    token.token_id(),
                    source_state
                );
                SubmittableCheck::discard_fork(format!(
                    "source state {} already spent by another transaction",
                    source_state
                ))
            }
            Ok(false) => SubmittableCheck::accept(),
            Err(e) => {
                warn!(
                    "Spent check for token {} transition {} failed: {}",
                    token.token_id(),
                    tx_index,
                    e
                );
                SubmittableCheck::retry_later(format!("spent check failed: {}", e))
            }
        }
    }

    /// Run every uncommitted transition through the submittable check
    pub async fn check_all_pending_transactions(
        &self,
        token: &TxfToken,
    ) -> PendingTransactionsReport {
        let mut report = PendingTransactionsReport::default();

        // Sequential: transition i's source depends on transition i-1
        for (index, tx) in token.transactions.iter().enumerate() {
            if tx.is_committed() {
                continue;
            }
            report.pending_count += 1;

            let check = self.is_pending_transaction_submittable(token, index).await;
            match check.action {
                ValidationAction::Accept => report.submittable += 1,
                ValidationAction::DiscardFork => {
                    report.dead += 1;
                    report.dead_transactions.push(DeadTransaction {
                        index,
                        reason: check.reason.unwrap_or_default(),
                    });
                }
                ValidationAction::RetryLater => {}
            }
        }

        report
    }
}
