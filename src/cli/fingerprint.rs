//! `zeptocache fingerprint` command handler.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use zeptocache::fingerprint;

/// Parse `name=value` pairs into a sorted context map.
pub(crate) fn parse_params(params: &[String]) -> Result<BTreeMap<String, String>> {
    let mut context = BTreeMap::new();
    for raw in params {
        let Some((name, value)) = raw.split_once('=') else {
            bail!("Invalid parameter '{}': expected name=value", raw);
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("Invalid parameter '{}': empty name", raw);
        }
        context.insert(name.to_string(), value.trim().to_string());
    }
    Ok(context)
}

pub(crate) fn cmd_fingerprint(text: &str, params: &[String]) -> Result<()> {
    let context = parse_params(params)?;
    println!("{}", fingerprint(text, &context));
    Ok(())
}
