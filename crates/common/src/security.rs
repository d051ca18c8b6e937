//! Correlation hashing for log hygiene.
//!
//! User identities and message content never appear verbatim in logs or
//! metrics. When correlation is required, a salted SHA-256 prefix stands in
//! for the raw value.

use sha2::{Digest, Sha256};

/// Length of the hex prefix used for correlation ids.
const CORRELATION_LEN: usize = 12;

/// Salted hash of a user id (or any identity-like value).
pub fn correlation_hash(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..CORRELATION_LEN].to_string()
}

/// Unsalted short hash of message content, for dedup/correlation only.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..CORRELATION_LEN].to_string()
}
