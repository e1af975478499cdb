//! Request fingerprinting.
//!
//! A fingerprint is the SHA-256 of the normalized request text plus its
//! contextual parameters (model, language, user, ...). Every component is
//! length-prefixed so `("a|b", "c")` and `("a", "b|c")` never collide.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// Normalize free text so trivially different prompts share a key:
/// trims, collapses internal whitespace runs, lowercases.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Build a deterministic fingerprint for `text` under `context`.
///
/// `context` is sorted by parameter name, so insertion order is irrelevant.
pub fn fingerprint(text: &str, context: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    let normalized = normalize_text(text);
    update_prefixed(&mut hasher, normalized.as_bytes());
    hasher.update((context.len() as u64).to_le_bytes());
    for (name, value) in context {
        update_prefixed(&mut hasher, name.as_bytes());
        update_prefixed(&mut hasher, value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint with a fixed set of `(name, value)` pairs.
pub fn fingerprint_with<'a, I>(text: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let context = params
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    fingerprint(text, &context)
}

/// Enforce the key precondition: non-empty, not all whitespace, no
/// control characters.
pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(CacheError::InvalidKey("key is empty".into()));
    }
    if key.chars().any(char::is_control) {
        return Err(CacheError::InvalidKey(format!(
            "key '{}' contains control characters",
            key.escape_default()
        )));
    }
    Ok(())
}

/// First 8 chars of a key, for log fields.
pub fn short_key(key: &str) -> &str {
    match key.char_indices().nth(8) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

fn update_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
