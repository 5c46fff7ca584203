//! Canonical serialization, hashing, and pseudonymization.

use super::event::AuditEvent;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of arbitrary content, base-16.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Canonical JSON form of an event without its `event_hash` field.
///
/// `serde_json` objects are key-sorted, so two structurally equal events
/// always produce the same bytes. Unknown fields (captured in `extra`)
/// flatten into the object and therefore contribute to the hash.
pub fn canonical_form(event: &AuditEvent) -> String {
    let mut value = serde_json::to_value(event).unwrap_or_default();
    if let Some(object) = value.as_object_mut() {
        object.remove("event_hash");
    }
    value.to_string()
}

/// Hash of the canonical form; the value stored in `event_hash`.
pub fn event_hash(event: &AuditEvent) -> String {
    sha256_hex(canonical_form(event).as_bytes())
}

/// Stable user-id pseudonymizer keyed by a per-process salt.
///
/// The same user id always maps to the same pseudonym within a process
/// lifetime, and the pseudonym can never collide with a raw id thanks to
/// the fixed prefix.
#[derive(Debug)]
pub struct Pseudonymizer {
    salt: [u8; 32],
}

impl Pseudonymizer {
    /// Create with a fresh random salt.
    pub fn new() -> Self {
        let mut salt = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut salt[..]);
        Self { salt }
    }

    /// Create with a fixed salt, for deterministic tests.
    pub fn with_salt(salt: [u8; 32]) -> Self {
        Self { salt }
    }

    /// Map a raw user id to its stable pseudonym.
    pub fn pseudonymize(&self, user_id: &str) -> String {
        // HMAC accepts keys of any length; this cannot fail for a 32-byte
        // salt.
        let mut mac = HmacSha256::new_from_slice(&self.salt).expect("fixed-size HMAC key");
        mac.update(user_id.as_bytes());
        let digest = mac.finalize().into_bytes();
        format!("anon-{}", hex::encode(&digest[..8]))
    }
}

impl Default for Pseudonymizer {
    fn default() -> Self {
        Self::new()
    }
}
