//! Content hashing helpers.

use sha2::{Digest, Sha256};

/// SHA-256 of `bytes` as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Stable 16-hex-char fragment identifier for `(document_id, sequence)`.
pub fn fragment_id(document_id: &str, sequence: u32) -> String {
    let mut id = sha256_hex(format!("{}_{}", document_id, sequence).as_bytes());
    id.truncate(16);
    id
}
