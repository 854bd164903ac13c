// TXF Inventory - Entry point
// Principle: the replica is the wallet's, the aggregator is the judge

mod cli;

use clap::Parser;
use cli::Cli;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_filter = if cli.verbose { "debug" } else { cli.log_level.as_str() };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("🪙 TXF inventory v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = cli::runner::run(cli).await {
        error!("{}", e);
        return Err(anyhow::anyhow!("{}", e));
    }

    Ok(())
}
