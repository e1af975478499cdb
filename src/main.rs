//! ZeptoCache CLI — inspect config, fingerprint prompts, and run coalescing
//! simulations against a synthetic slow upstream.

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("zeptocache=info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Simulate(args) => cli::simulate::cmd_simulate(cli.config, args).await,
        Commands::Config { action } => cli::config::cmd_config(cli.config, action),
        Commands::Fingerprint { text, param } => cli::fingerprint::cmd_fingerprint(&text, &param),
    }
}
