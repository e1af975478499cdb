//! Command-line definitions and handlers.

pub(crate) mod config;
pub(crate) mod fingerprint;
pub(crate) mod simulate;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "zeptocache", version, about = "LLM response cache with request coalescing")]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.zeptocache/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Fire concurrent requests at a simulated slow upstream and report stats
    Simulate(SimulateArgs),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the cache fingerprint of a prompt
    Fingerprint {
        /// Prompt text
        text: String,
        /// Context parameter as name=value (repeatable)
        #[arg(long, short)]
        param: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Print the effective configuration as JSON
    Show,
    /// Print the config file path
    Path,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct SimulateArgs {
    /// Concurrent requests per wave
    #[arg(long, default_value_t = 20)]
    pub requests: usize,
    /// Distinct prompts the requests are spread across
    #[arg(long, default_value_t = 3)]
    pub keys: usize,
    /// Upstream latency in milliseconds
    #[arg(long, default_value_t = 200)]
    pub latency_ms: u64,
    /// Number of waves; waves after the first should be served from cache
    #[arg(long, default_value_t = 2)]
    pub waves: usize,
    /// Make every Nth distinct prompt fail upstream (0 = never)
    #[arg(long, default_value_t = 0)]
    pub fail_every: usize,
    /// Print final stats as JSON
    #[arg(long)]
    pub json: bool,
}
