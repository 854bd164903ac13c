// Inventory - One synchronization pass over the local replica
// Principle: the sync lock serializes every write to the replica
//
// acquire lock -> load -> validate -> resolve forks -> tombstone spent
//   -> import -> write back -> release lock

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::leader::LeaderCoordinator;
use crate::serialization::{
    build_storage_data, parse_storage_json, validate_txf_token, ParsedStorage, SerializationError,
    TxfStorageData,
};
use crate::storage::{StorageError, StorageExt, StoragePort};
use crate::types::{
    CircuitBreakerState, InvalidEntry, SentEntry, SyncOperationStats, Tombstone,
    TokenInventoryStats, TxfToken, TXF_FORMAT_VERSION,
};
use crate::validation::{BatchOptions, TokenValidator};

/// Sync errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

/// Summary of a finished pass
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub stats: SyncOperationStats,
    pub census: TokenInventoryStats,
    /// Records skipped while reading the replica or importing
    pub validation_errors: Vec<String>,
    /// Circuit breaker verdict for the caller's replication layer; the pass
    /// itself only talks to the aggregator and runs either way
    pub local_mode: bool,
}

#[derive(Debug, Clone)]
pub enum SyncStatus {
    Completed(SyncReport),
    /// Another instance holds the lock
    LockUnavailable,
}

impl TokenInventoryStats {
    /// Census of one replica
    pub fn from_storage(data: &TxfStorageData) -> Self {
        Self {
            active_tokens: data.tokens.len(),
            sent_tokens: data.sent.len(),
            outbox_tokens: data.outbox.len(),
            invalid_tokens: data.invalid.len(),
            nametag_tokens: usize::from(data.nametag.is_some()),
            tombstone_count: data.tombstones.len(),
        }
    }
}

/// Merge externally received tokens into the replica
///
/// Tombstoned states are never re-imported. A token already present is only
/// replaced by a copy with a longer committed chain; the old copy is archived.
pub fn import_tokens(
    data: &mut TxfStorageData,
    tokens: &[TxfToken],
    stats: &mut SyncOperationStats,
    errors: &mut Vec<String>,
) {
    for token in tokens {
        let token_id = token.token_id().to_string();

        let problems = validate_txf_token(token);
        if !problems.is_empty() {
            errors.push(format!("import {}: {}", token_id, problems.join("; ")));
            continue;
        }

        let Some(state_hash) = token.current_state_hash() else {
            continue;
        };
        if data.is_tombstoned(&token_id, state_hash) {
            debug!("Skipping import of spent state {} of {}", state_hash, token_id);
            continue;
        }

        match data.tokens.get(&token_id) {
            None => {
                data.tokens.insert(token_id, token.clone());
                stats.tokens_imported += 1;
            }
            Some(existing) if existing == token => {}
            Some(existing) => {
                if committed_len(token) > committed_len(existing) {
                    data.archived.insert(token_id.clone(), existing.clone());
                    data.tokens.insert(token_id, token.clone());
                    stats.tokens_updated += 1;
                }
            }
        }
    }
}

fn committed_len(token: &TxfToken) -> usize {
    token.first_uncommitted_index().unwrap_or(token.transactions.len())
}

/// Drives sync passes for one replica
pub struct InventorySync {
    storage: Arc<dyn StoragePort>,
    validator: Arc<TokenValidator>,
    coordinator: Arc<LeaderCoordinator>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl InventorySync {
    pub fn new(
        storage: Arc<dyn StoragePort>,
        validator: Arc<TokenValidator>,
        coordinator: Arc<LeaderCoordinator>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            validator,
            coordinator,
            clock,
            config,
        }
    }

    fn breaker_key(&self) -> String {
        format!("{}_circuit_breaker", self.config.storage_key)
    }

    fn load_breaker(&self) -> Result<CircuitBreaker, SyncError> {
        let state: CircuitBreakerState =
            self.storage.get_json(&self.breaker_key())?.unwrap_or_default();
        Ok(CircuitBreaker::from_state(state, self.config.circuit_breaker))
    }

    /// Report a failed replication of the replica; returns whether local
    /// mode is active afterwards
    pub fn record_replication_failure(&self) -> Result<bool, SyncError> {
        let mut breaker = self.load_breaker()?;
        breaker.record_ipfs_failure(self.clock.now_ms());
        self.storage.set_json(&self.breaker_key(), breaker.state())?;
        Ok(breaker.is_local_mode())
    }

    pub fn is_local_mode(&self) -> Result<bool, SyncError> {
        Ok(self.load_breaker()?.is_local_mode())
    }

    /// Read and parse the replica; a missing document is an empty replica
    pub fn load(&self) -> Result<ParsedStorage, SyncError> {
        match self.storage.get(&self.config.storage_key)? {
            Some(json) => Ok(parse_storage_json(&json)?),
            None => Ok(ParsedStorage::default()),
        }
    }

    pub fn census(&self) -> Result<TokenInventoryStats, SyncError> {
        Ok(TokenInventoryStats::from_storage(&self.load()?.data))
    }

    /// Run one pass, importing `imports` along the way
    pub async fn run_pass(&self, imports: &[TxfToken]) -> Result<SyncStatus, SyncError> {
        if !self.coordinator.acquire_lock(self.config.lock_timeout()).await {
            info!("⏳ Sync lock unavailable, skipping pass");
            return Ok(SyncStatus::LockUnavailable);
        }

        let result = self.run_locked(imports).await;
        self.coordinator.release_lock().await;

        match &result {
            Ok(report) => info!(
                "✅ Sync pass: {} validated, {} updated, {} removed, {} imported, {} conflicts",
                report.stats.tokens_validated,
                report.stats.tokens_updated,
                report.stats.tokens_removed,
                report.stats.tokens_imported,
                report.stats.conflicts_resolved
            ),
            Err(e) => warn!("❌ Sync pass failed: {}", e),
        }
        result.map(SyncStatus::Completed)
    }

    async fn run_locked(&self, imports: &[TxfToken]) -> Result<SyncReport, SyncError> {
        let now = self.clock.now_ms();
        let ParsedStorage {
            mut data,
            validation_errors,
        } = self.load()?;
        let mut report = SyncReport {
            validation_errors,
            ..SyncReport::default()
        };
        let stats = &mut report.stats;

        // Validate: patch fetched proofs in, set broken payloads aside
        let tokens = data.active_tokens();
        stats.tokens_validated = tokens.len() as u64;
        let batch = self
            .validator
            .validate_all_tokens(&tokens, BatchOptions::default())
            .await;
        stats.tokens_unverified += batch.unverified as u64;

        for token in &batch.valid_tokens {
            let Some(txf) = token.txf() else { continue };
            let token_id = txf.token_id().to_string();
            if data.tokens.get(&token_id) != Some(&txf) {
                data.tokens.insert(token_id, txf);
                stats.tokens_updated += 1;
            }
        }

        for issue in &batch.issues {
            let structural = issue.failure.as_ref().map_or(false, |f| f.is_structural());
            if !structural {
                continue;
            }
            if let Some(token) = data.tokens.remove(&issue.token_id) {
                warn!("🚫 Token {} set aside: {}", issue.token_id, issue.reason);
                data.invalid.push(InvalidEntry {
                    token: serde_json::to_value(&token).map_err(SerializationError::from)?,
                    reason: issue.reason.clone(),
                    detected_at: now,
                });
                stats.tokens_removed += 1;
            }
        }

        // Forks: truncate before the first dead transition, keep the divergent copy
        let pending: Vec<(String, TxfToken)> = data
            .tokens
            .iter()
            .filter(|(_, token)| token.has_uncommitted())
            .map(|(id, token)| (id.clone(), token.clone()))
            .collect();

        for (token_id, token) in pending {
            let check = self.validator.check_all_pending_transactions(&token).await;
            if check.pending_count > check.submittable + check.dead {
                stats.tokens_unverified += 1;
            }
            let Some(first_dead) = check.dead_transactions.first() else {
                continue;
            };

            info!(
                "🍴 Token {} forked at transition {}: {}",
                token_id, first_dead.index, first_dead.reason
            );
            let truncated = token.truncated(first_dead.index);
            data.add_forked(token);
            data.tokens.insert(token_id, truncated);
            stats.conflicts_resolved += 1;
        }

        // Spent: tombstone the state and move the token to sent
        if let Some(public_key) = self.validator.identity() {
            let tokens = data.active_tokens();
            let spent = self
                .validator
                .check_spent_tokens(&tokens, public_key, BatchOptions::default())
                .await;
            stats.tokens_unverified += spent.errors.len() as u64;

            for info in spent.spent_tokens {
                let Some(token) = data.tokens.remove(&info.token_id) else {
                    continue;
                };
                if data.add_tombstone(Tombstone::new(&info.token_id, &info.state_hash, now)) {
                    stats.tombstones_added += 1;
                }
                data.sent.push(SentEntry {
                    token,
                    timestamp: now,
                    spent_at: now,
                });
                stats.tokens_removed += 1;
            }
        }

        import_tokens(&mut data, imports, stats, &mut report.validation_errors);

        // Write back
        let meta = data.meta.get_or_insert_with(Default::default);
        meta.version += 1;
        meta.format_version = TXF_FORMAT_VERSION.to_string();

        let document = build_storage_data(&data)?;
        self.storage
            .set_json(&self.config.storage_key, &document)?;

        // Breaker state is read late so replication failures reported
        // during the pass are not overwritten
        let mut breaker = self.load_breaker()?;
        if stats.conflicts_resolved == 0 {
            if !breaker.is_local_mode() || breaker.should_attempt_recovery(now) {
                breaker.record_success();
            }
        } else {
            for _ in 0..stats.conflicts_resolved {
                breaker.record_conflict(now);
            }
            if breaker.should_attempt_recovery(now) {
                breaker.schedule_recovery(now);
            }
        }
        self.storage.set_json(&self.breaker_key(), breaker.state())?;

        report.local_mode = breaker.is_local_mode();
        report.census = TokenInventoryStats::from_storage(&data);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, TokioClock};
    use crate::config::LeaderConfig;
    use crate::leader::InMemoryBus;
    use crate::storage::MemoryStorage;
    use crate::tests::support::{validator, MockProofSource, MockVerifier, SpentAnswer};
    use crate::types::token::fixtures::{proof_for, txf_token};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Harness {
        storage: Arc<MemoryStorage>,
        coordinator: Arc<LeaderCoordinator>,
        sync: InventorySync,
    }

    async fn harness(validator: TokenValidator) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let coordinator = Arc::new(LeaderCoordinator::start(
            Arc::new(InMemoryBus::default()),
            Arc::new(TokioClock::new()),
            LeaderConfig::default(),
        ));
        // Alone on the bus: leader once the election window closes
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let sync = InventorySync::new(
            storage.clone(),
            Arc::new(validator),
            coordinator.clone(),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            EngineConfig::default(),
        );
        Harness {
            storage,
            coordinator,
            sync,
        }
    }

    fn seed(storage: &MemoryStorage, data: &TxfStorageData) {
        let document = build_storage_data(data).unwrap();
        storage
            .set("txf_inventory", &serde_json::to_string(&document).unwrap())
            .unwrap();
    }

    fn seed_document(storage: &MemoryStorage, document: &Value) {
        storage
            .set("txf_inventory", &serde_json::to_string(document).unwrap())
            .unwrap();
    }

    fn stored_document(storage: &MemoryStorage) -> Value {
        storage.get_json("txf_inventory").unwrap().unwrap()
    }

    fn completed(status: SyncStatus) -> SyncReport {
        match status {
            SyncStatus::Completed(report) => report,
            SyncStatus::LockUnavailable => panic!("lock unavailable"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_patches_proofs_and_bumps_version() {
        let token = txf_token("aa01", 1, 0);
        let proofs = Arc::new(MockProofSource::new());
        proofs.insert(&token.transactions[0].new_state_hash, proof_for("s1"));
        let h = harness(validator(proofs, None, false)).await;

        let mut data = TxfStorageData::default();
        data.tokens.insert("aa01".to_string(), token);
        seed(&h.storage, &data);

        let report = completed(h.sync.run_pass(&[]).await.unwrap());
        assert_eq!(report.stats.tokens_validated, 1);
        assert_eq!(report.stats.tokens_updated, 1);
        assert!(!h.coordinator.has_lock().await);

        let stored = h.sync.load().unwrap().data;
        assert!(!stored.tokens["aa01"].has_uncommitted());
        assert_eq!(stored.meta.unwrap().version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_transition_forks_token() {
        let token = txf_token("aa01", 2, 1);
        let verifier = Arc::new(MockVerifier::new(SpentAnswer::Unspent));
        verifier.answer(&token.transactions[0].new_state_hash, SpentAnswer::Spent);
        let h = harness(validator(Arc::new(MockProofSource::new()), Some(verifier), true)).await;

        let mut data = TxfStorageData::default();
        data.tokens.insert("aa01".to_string(), token.clone());
        seed(&h.storage, &data);

        let report = completed(h.sync.run_pass(&[]).await.unwrap());
        assert_eq!(report.stats.conflicts_resolved, 1);

        let stored = h.sync.load().unwrap().data;
        assert_eq!(stored.forked.len(), 1);
        assert_eq!(stored.forked.values().next(), Some(&token));

        // Truncated to its committed prefix, whose tip is the spent state
        assert_eq!(stored.sent.len(), 1);
        assert_eq!(stored.sent[0].token.transactions.len(), 1);
        assert_eq!(stored.tombstones.len(), 1);
        assert_eq!(report.census.sent_tokens, 1);
        assert_eq!(report.census.active_tokens, 0);

        let breaker: CircuitBreakerState = h
            .storage
            .get_json("txf_inventory_circuit_breaker")
            .unwrap()
            .unwrap();
        assert_eq!(breaker.consecutive_conflicts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spent_tokens_are_tombstoned_and_not_reimported() {
        let token = txf_token("aa01", 0, 0);
        let verifier = Arc::new(MockVerifier::new(SpentAnswer::Spent));
        let h = harness(validator(Arc::new(MockProofSource::new()), Some(verifier), true)).await;

        let mut data = TxfStorageData::default();
        data.tokens.insert("aa01".to_string(), token.clone());
        seed(&h.storage, &data);

        let report = completed(h.sync.run_pass(&[]).await.unwrap());
        assert_eq!(report.stats.tombstones_added, 1);
        assert_eq!(report.stats.tokens_removed, 1);

        let again = completed(h.sync.run_pass(&[token]).await.unwrap());
        assert_eq!(again.stats.tokens_imported, 0);
        assert_eq!(again.census.active_tokens, 0);
        assert_eq!(again.census.tombstone_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inconclusive_checks_are_counted() {
        let h = harness(validator(
            Arc::new(MockProofSource::new()),
            Some(Arc::new(MockVerifier::new(SpentAnswer::Error))),
            true,
        ))
        .await;

        let mut data = TxfStorageData::default();
        data.tokens.insert("aa01".to_string(), txf_token("aa01", 1, 0));
        data.tokens.insert("bb02".to_string(), txf_token("bb02", 0, 0));
        seed(&h.storage, &data);

        let report = completed(h.sync.run_pass(&[]).await.unwrap());
        // aa01: pending check and spent check inconclusive; bb02: spent check
        assert_eq!(report.stats.tokens_unverified, 3);
        assert_eq!(report.census.active_tokens, 2);
        assert_eq!(report.stats.tokens_removed, 0);
    }

    #[test]
    fn test_import_prefers_longer_committed_chain() {
        let mut data = TxfStorageData::default();
        let mut stats = SyncOperationStats::default();
        let mut errors = Vec::new();

        import_tokens(&mut data, &[txf_token("aa01", 1, 0)], &mut stats, &mut errors);
        assert_eq!(stats.tokens_imported, 1);

        import_tokens(&mut data, &[txf_token("aa01", 1, 1)], &mut stats, &mut errors);
        assert_eq!(stats.tokens_updated, 1);
        assert_eq!(data.archived.len(), 1);

        import_tokens(&mut data, &[txf_token("aa01", 1, 0)], &mut stats, &mut errors);
        assert_eq!(stats.tokens_updated, 1);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_census() {
        let mut data = TxfStorageData::default();
        data.tokens.insert("aa01".to_string(), txf_token("aa01", 0, 0));
        data.add_tombstone(Tombstone::new("bb", "cc", 1));

        let census = TokenInventoryStats::from_storage(&data);
        assert_eq!(census.active_tokens, 1);
        assert_eq!(census.tombstone_count, 1);
        assert_eq!(census.nametag_tokens, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_records_survive_write_back() {
        let h = harness(validator(Arc::new(MockProofSource::new()), None, false)).await;
        let good_tombstone = json!({ "tokenId": "x", "stateHash": "y", "timestamp": 1 });
        let bad_tombstone = json!({ "tokenId": "broken" });
        seed_document(
            &h.storage,
            &json!({
                "_meta": { "version": 4, "formatVersion": "2.0", "walletLabel": "main" },
                "_aa01": serde_json::to_value(txf_token("aa01", 0, 0)).unwrap(),
                "_bb02": { "genesis": 42 },
                "_tombstones": [good_tombstone.clone(), bad_tombstone.clone()],
                "walletExtension": { "theme": "dark" }
            }),
        );

        for version in [5, 6] {
            let report = completed(h.sync.run_pass(&[]).await.unwrap());
            assert_eq!(report.validation_errors.len(), 3, "{:?}", report.validation_errors);
            assert_eq!(report.census.active_tokens, 1);

            let document = stored_document(&h.storage);
            assert_eq!(document["_bb02"], json!({ "genesis": 42 }));
            assert_eq!(document["walletExtension"], json!({ "theme": "dark" }));
            assert_eq!(
                document["_tombstones"],
                json!([good_tombstone.clone(), bad_tombstone.clone()])
            );
            assert_eq!(document["_meta"]["version"], version);
            assert_eq!(document["_meta"]["walletLabel"], "main");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_token_missing_a_scalar_stays_active() {
        let h = harness(validator(Arc::new(MockProofSource::new()), None, false)).await;
        let mut settled = serde_json::to_value(txf_token("bb02", 1, 1)).unwrap();
        settled["genesis"]["data"]
            .as_object_mut()
            .unwrap()
            .remove("tokenType");
        seed_document(
            &h.storage,
            &json!({
                "_aa01": serde_json::to_value(txf_token("aa01", 0, 0)).unwrap(),
                "_bb02": settled
            }),
        );

        let report = completed(h.sync.run_pass(&[]).await.unwrap());
        assert!(report.validation_errors.is_empty(), "{:?}", report.validation_errors);
        assert_eq!(report.census.active_tokens, 2);
        assert_eq!(report.stats.tokens_removed, 0);

        let stored = h.sync.load().unwrap().data;
        assert_eq!(stored.tokens["bb02"].transactions.len(), 1);
        assert!(!stored.tokens["bb02"].has_uncommitted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_under_foreign_key_is_not_duplicated() {
        let h = harness(validator(Arc::new(MockProofSource::new()), None, false)).await;
        let foreign = serde_json::to_value(txf_token("bb02", 0, 0)).unwrap();
        seed_document(&h.storage, &json!({ "_aa01": foreign.clone() }));

        let report = completed(h.sync.run_pass(&[]).await.unwrap());
        assert_eq!(report.census.active_tokens, 0);
        assert_eq!(report.stats.tokens_updated, 0);
        assert!(report.validation_errors[0].contains("key does not match tokenId bb02"));

        let document = stored_document(&h.storage);
        let mut keys: Vec<&String> = document.as_object().unwrap().keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["_aa01", "_meta"]);
        assert_eq!(document["_aa01"], foreign);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replication_failures_enter_local_mode() {
        let h = harness(validator(Arc::new(MockProofSource::new()), None, false)).await;

        assert!(!h.sync.record_replication_failure().unwrap());
        assert!(!h.sync.record_replication_failure().unwrap());
        assert!(h.sync.record_replication_failure().unwrap());
        assert!(h.sync.is_local_mode().unwrap());

        // A pass before the recovery time keeps local mode and the counters
        let report = completed(h.sync.run_pass(&[]).await.unwrap());
        assert!(report.local_mode);
        let breaker: CircuitBreakerState = h
            .storage
            .get_json("txf_inventory_circuit_breaker")
            .unwrap()
            .unwrap();
        assert_eq!(breaker.consecutive_ipfs_failures, 3);
    }
}
