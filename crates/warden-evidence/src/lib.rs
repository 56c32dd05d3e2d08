//! Evidence primitives: canonical serialization, content hashing, and
//! artifact references.
//!
//! Every digest in the system goes through this crate so that two
//! components can never disagree about what a given structure hashes to.
//! Anything persisted as evidence must be written through
//! [`ArtifactStore::write`] — that is the single chokepoint that ties a
//! file on disk to the hash recorded in a receipt.

#![deny(unsafe_code)]

mod artifact;
mod canonical;
mod hash;

pub use artifact::{ArtifactRef, ArtifactStore};
pub use canonical::canonicalize;
pub use hash::{rollup, sha256_hex};

use thiserror::Error;

/// Evidence-related errors.
#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact path escapes the store root: {0}")]
    PathEscape(String),

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("artifact digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
