//! Hashing helpers used for storage identifiers

use sha2::{Digest, Sha256};

/// Length in characters of a [`sha256_hex`] digest
pub const SHA256_HEX_LEN: usize = 64;

/// Calculate SHA256 hash and return as hex string
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}
