//! Content hashing helpers.

use sha2::{Digest, Sha256};

/// SHA-256 of the given bytes, hex-encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Rollup digest over a set of per-artifact hashes.
///
/// The input hashes are sorted before concatenation, so the rollup is
/// independent of the order in which artifacts were produced. An empty
/// set rolls up to the hash of the empty string.
pub fn rollup<S: AsRef<str>>(hashes: &[S]) -> String {
    let mut sorted: Vec<&str> = hashes.iter().map(|h| h.as_ref()).collect();
    sorted.sort_unstable();
    sha256_hex(sorted.concat().as_bytes())
}
