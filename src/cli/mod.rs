// CLI - Command line interface over a file-backed replica
// Principle: every command reads the same replica the wallet writes

pub mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// TXF inventory - validate and synchronize a wallet token replica
#[derive(Parser, Debug)]
#[command(name = "txf-inventory")]
#[command(author = "KratOs Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Token inventory synchronization & validation engine")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the replica files
    #[arg(short = 'd', long, global = true, env = "TXF_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Path to configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Aggregator base URL (overrides the config file)
    #[arg(long, global = true, env = "TXF_AGGREGATOR_URL")]
    pub aggregator: Option<String>,

    /// Trust base JSON file; without it verification is skipped
    #[arg(long, global = true)]
    pub trust_base: Option<PathBuf>,

    /// Wallet public key (hex) used for spent checks
    #[arg(long, global = true, env = "TXF_PUBLIC_KEY")]
    pub public_key: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", env = "TXF_LOG")]
    pub log_level: String,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate every active token of the replica
    Validate(ValidateCmd),

    /// Print the inventory census
    Stats,

    /// Run one sync pass
    Sync(SyncCmd),
}

#[derive(Parser, Debug)]
pub struct ValidateCmd {
    /// Also audit pending transitions of each token
    #[arg(long)]
    pub pending: bool,

    /// Also check split tokens against their parent burn
    #[arg(long)]
    pub split: bool,
}

#[derive(Parser, Debug)]
pub struct SyncCmd {
    /// JSON file with an array of TXF tokens to import
    #[arg(long)]
    pub import: Option<PathBuf>,
}
