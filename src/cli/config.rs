//! `zeptocache config` command handler.

use std::path::PathBuf;

use anyhow::{Context, Result};

use zeptocache::CacheConfig;

use super::ConfigAction;

/// Load config from `path`, or from the default location.
pub(crate) fn load_config(path: Option<&PathBuf>) -> Result<CacheConfig> {
    let path = path.cloned().unwrap_or_else(CacheConfig::path);
    CacheConfig::load_from_path(&path)
        .with_context(|| format!("Failed to load cache config from {}", path.display()))
}

/// Handle `zeptocache config` subcommands.
pub(crate) fn cmd_config(path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(path.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            let path = path.unwrap_or_else(CacheConfig::path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
