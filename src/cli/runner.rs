// Runner - Wires the engine against a file-backed replica
// Principle: one process, one instance on the bus; output is JSON on stdout

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use txf_inventory::aggregator::{AggregatorClient, ProofSource};
use txf_inventory::clock::{Clock, SystemClock};
use txf_inventory::config::{ConfigError, EngineConfig};
use txf_inventory::inventory::{InventorySync, SyncError, SyncStatus};
use txf_inventory::leader::{InMemoryBus, LeaderCoordinator};
use txf_inventory::storage::FileStorage;
use txf_inventory::types::{Token, TxfToken};
use txf_inventory::validation::{BatchOptions, TokenValidator};
use txf_inventory::verifier::{AggregatorVerifier, FileTrustBaseProvider};

use crate::cli::{Cli, Commands, SyncCmd, ValidateCmd};

/// Runner errors
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Aggregator error: {0}")]
    Aggregator(String),

    #[error("Invalid public key: {0}")]
    PublicKey(String),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid import file: {0}")]
    Import(#[from] serde_json::Error),
}

/// Everything a command needs, built once from the CLI
struct Engine {
    sync: InventorySync,
    validator: Arc<TokenValidator>,
    coordinator: Arc<LeaderCoordinator>,
}

/// Execute the parsed command and print its JSON result
pub async fn run(cli: Cli) -> Result<(), RunnerError> {
    let config = build_config(&cli)?;
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    info!("📁 Data dir: {}", data_dir.display());
    info!("🌐 Aggregator: {}", config.aggregator_url);

    let engine = build_engine(&cli, &config, data_dir).await?;

    let output = match &cli.command {
        Commands::Validate(cmd) => validate(&engine, cmd).await?,
        Commands::Stats => serde_json::to_value(engine.sync.census()?)?,
        Commands::Sync(cmd) => sync(&engine, cmd).await?,
    };

    engine.coordinator.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("txf-inventory")
}

/// File config (if any) with CLI overrides applied
fn build_config(cli: &Cli) -> Result<EngineConfig, RunnerError> {
    let mut config = match &cli.config {
        Some(path) if path.exists() => EngineConfig::load(path)?,
        Some(path) => {
            warn!("⚠️  Config file {} not found, using defaults", path.display());
            EngineConfig::default()
        }
        None => EngineConfig::default(),
    };

    if let Some(url) = &cli.aggregator {
        config = config.with_aggregator_url(url.clone());
    }

    config.validate()?;
    Ok(config)
}

async fn build_engine(
    cli: &Cli,
    config: &EngineConfig,
    data_dir: PathBuf,
) -> Result<Engine, RunnerError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let client = AggregatorClient::new(&config.aggregator_url, config.rpc_timeout())
        .map_err(|e| RunnerError::Aggregator(e.to_string()))?;
    let proofs: Arc<dyn ProofSource> = Arc::new(client);

    let mut validator = TokenValidator::new(proofs.clone(), clock.clone(), config)
        .with_verifier(Arc::new(AggregatorVerifier::new(proofs)));

    match &cli.trust_base {
        Some(path) => {
            let provider = Arc::new(FileTrustBaseProvider::new(path.clone()));
            validator = validator.with_trust_base_provider(provider);
        }
        None => warn!("⚠️  No trust base configured, verification and spent checks are skipped"),
    }

    if let Some(key) = &cli.public_key {
        let public_key = hex::decode(key.trim_start_matches("0x"))
            .map_err(|e| RunnerError::PublicKey(e.to_string()))?;
        validator = validator.with_identity(public_key);
    }
    let validator = Arc::new(validator);

    let bus = Arc::new(InMemoryBus::default());
    let coordinator = Arc::new(LeaderCoordinator::start(bus, clock.clone(), config.leader));
    debug!("Instance id {}", coordinator.instance_id());

    let storage = Arc::new(FileStorage::new(&data_dir));
    let sync = InventorySync::new(
        storage,
        validator.clone(),
        coordinator.clone(),
        clock,
        config.clone(),
    );

    Ok(Engine {
        sync,
        validator,
        coordinator,
    })
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn validate(engine: &Engine, cmd: &ValidateCmd) -> Result<Value, RunnerError> {
    let parsed = engine.sync.load()?;
    let tokens = parsed.data.active_tokens();
    info!("🔍 Validating {} token(s)", tokens.len());

    let on_progress = |completed: usize, total: usize| debug!("Validated {}/{}", completed, total);
    let options = BatchOptions::default().with_progress(&on_progress);
    let batch = engine.validator.validate_all_tokens(&tokens, options).await;

    let issues: Vec<Value> = batch
        .issues
        .iter()
        .map(|issue| json!({ "tokenId": issue.token_id, "reason": issue.reason }))
        .collect();

    let mut output = json!({
        "valid": batch.valid_tokens.len(),
        "unverified": batch.unverified,
        "issues": issues,
        "skippedRecords": parsed.validation_errors,
    });

    if cmd.pending {
        output["pending"] = pending_report(engine, &tokens).await;
    }

    if cmd.split {
        let split = engine.validator.validate_split_tokens(&tokens).await;
        let invalid: Vec<Value> = split
            .invalid
            .iter()
            .map(|entry| json!({ "tokenId": entry.token.token_id(), "reason": entry.reason }))
            .collect();
        output["split"] = json!({
            "valid": split.valid.len(),
            "invalid": invalid,
            "errors": split.errors,
        });
    }

    Ok(output)
}

async fn pending_report(engine: &Engine, tokens: &[Token]) -> Value {
    let mut reports = Vec::new();
    for token in tokens {
        let Some(txf) = token.txf() else {
            continue;
        };
        if !txf.has_uncommitted() {
            continue;
        }
        let report = engine.validator.check_all_pending_transactions(&txf).await;
        let dead: Vec<Value> = report
            .dead_transactions
            .iter()
            .map(|d| json!({ "index": d.index, "reason": d.reason }))
            .collect();
        reports.push(json!({
            "tokenId": txf.token_id(),
            "pending": report.pending_count,
            "submittable": report.submittable,
            "dead": dead,
        }));
    }
    Value::Array(reports)
}

async fn sync(engine: &Engine, cmd: &SyncCmd) -> Result<Value, RunnerError> {
    let imports: Vec<TxfToken> = match &cmd.import {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            serde_json::from_str(&raw)?
        }
        None => Vec::new(),
    };

    // The lock wait covers the opening election of this fresh instance
    match engine.sync.run_pass(&imports).await? {
        SyncStatus::Completed(report) => Ok(json!({
            "status": "completed",
            "stats": report.stats,
            "census": report.census,
            "localMode": report.local_mode,
            "skippedRecords": report.validation_errors,
        })),
        SyncStatus::LockUnavailable => Ok(json!({ "status": "lock-unavailable" })),
    }
}
