//! Append-only, hash-chained receipt ledger.
//!
//! Every authorized action, policy decision, and job transition lands
//! here as a [`Receipt`](warden_types::Receipt). Appends for one ledger
//! are strictly serialized so `prev_hash` linkage is race-free; reads
//! may run concurrently and observe either the old or new chain length,
//! never a torn entry. A failed append never advances the chain head,
//! so no receipt can point at an entry that was not durably committed.
//!
//! Two sinks: [`MemoryLedger`] for tests and embedding, [`FileLedger`]
//! for the append-only JSONL persistence format (one receipt per line,
//! plus a `.sha256` sidecar of the whole file for offline checks).

#![deny(unsafe_code)]

mod chain;
mod file;
mod memory;
mod verify;

pub use chain::ChainState;
pub use file::{verify_file, FileLedger, FileVerification};
pub use memory::MemoryLedger;
pub use verify::{verify_chain, ChainVerification};

use async_trait::async_trait;
use thiserror::Error;
use warden_types::{JobId, Receipt, ReceiptDraft};

/// Ledger-related errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ledger integrity violation at entry {entry_id}: {detail}")]
    Integrity { entry_id: String, detail: String },

    #[error("ledger is poisoned after a failed integrity check; open a fresh handle")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// The ledger interface every sink implements.
#[async_trait]
pub trait ReceiptLedger: Send + Sync {
    /// Seal `draft` onto the end of the chain and persist it.
    /// All-or-nothing: on error the chain head is unchanged.
    async fn append(&self, draft: ReceiptDraft) -> Result<Receipt>;

    /// Recompute the chain from entry 1 and report the first divergence.
    /// A failed check poisons the ledger against further appends.
    async fn verify(&self) -> Result<ChainVerification>;

    /// All receipts recorded for one job, in append order.
    async fn query(&self, job_id: &JobId) -> Result<Vec<Receipt>>;

    /// Every receipt in append order.
    async fn all(&self) -> Result<Vec<Receipt>>;

    /// Number of entries in the chain.
    async fn len(&self) -> Result<u64>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
