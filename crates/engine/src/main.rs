//! OrderGate binary.
//!
//! Loads configuration, initializes tracing, and runs the [`Engine`] against
//! the paper gateway until SIGINT.

use std::path::PathBuf;

use clap::Parser;

use og_core::config::AppConfig;
use og_engine::Engine;

/// OrderGate order-management engine
#[derive(Parser, Debug)]
#[command(name = "og-engine", about = "OrderGate order-management engine")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Human-readable logs instead of JSON.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config)?;

    og_core::logging::init_tracing(!args.pretty)?;

    tracing::info!(
        mode = ?config.trading.mode,
        users = config.trading.users.len(),
        instruments = config.paper.instruments.len(),
        "starting og-engine"
    );

    let (engine, _gateway) = Engine::paper(config)?;
    engine.run().await
}
