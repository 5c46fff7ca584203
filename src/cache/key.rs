//! Cache key derivation and prompt normalization.

use crate::audit::sha256_hex;
use crate::types::Request;
use serde_json::json;

/// Prefix marking orchestrator cache keys in a shared store.
const KEY_PREFIX: &str = "cc:";

/// Longest prompt prefix that participates in normalization.
const NORMALIZE_CAP: usize = 500;

/// Canonical cache key for a request.
///
/// SHA-256 over a canonical JSON serialization of the prompt, the
/// key-relevant context fields, and the tool descriptors. `serde_json`
/// objects serialize with sorted keys, so two structurally equal requests
/// always produce the same key regardless of construction order.
pub fn cache_key(request: &Request, max_key_length: usize) -> String {
    let tools: Vec<serde_json::Value> = request
        .tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })
        })
        .collect();

    let canonical = json!({
        "prompt": request.prompt,
        "context": {
            "budget_tier": request.context.budget_tier.as_str(),
            "domain": request.context.domain.as_str(),
            "locale": request.context.locale,
            "require_tools": request.context.require_tools,
        },
        "tools": tools,
    })
    .to_string();

    let mut key = format!("{}{}", KEY_PREFIX, sha256_hex(canonical.as_bytes()));
    key.truncate(max_key_length.max(KEY_PREFIX.len() + 16));
    key
}

/// Normalize a prompt for query-pattern bucketing: lowercase, punctuation
/// stripped, whitespace collapsed, capped at 500 characters.
pub fn normalize_prompt(prompt: &str) -> String {
    let mut normalized = String::with_capacity(prompt.len().min(NORMALIZE_CAP));
    let mut count = 0usize;
    let mut last_was_space = true;
    for c in prompt.chars() {
        if count >= NORMALIZE_CAP {
            break;
        }
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                normalized.push(lower);
                count += 1;
            }
            last_was_space = false;
        } else if (c.is_whitespace() || c.is_ascii_punctuation()) && !last_was_space {
            // Punctuation collapses into the same separator as spaces.
            normalized.push(' ');
            count += 1;
            last_was_space = true;
        }
    }
    normalized.trim_end().to_string()
}
