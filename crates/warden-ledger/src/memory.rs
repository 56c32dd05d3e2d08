//! In-memory ledger sink.

use crate::{verify_chain, ChainState, ChainVerification, LedgerError, ReceiptLedger, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use warden_types::{JobId, Receipt, ReceiptDraft};

/// Memory-backed ledger for tests and embedded use.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
    poisoned: AtomicBool,
}

#[derive(Default)]
struct Inner {
    chain: ChainState,
    entries: Vec<Receipt>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReceiptLedger for MemoryLedger {
    async fn append(&self, draft: ReceiptDraft) -> Result<Receipt> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(LedgerError::Poisoned);
        }

        let mut inner = self.inner.lock();
        let receipt = draft.finalize(inner.chain.head());
        inner.chain.advance(&receipt);
        inner.entries.push(receipt.clone());
        Ok(receipt)
    }

    async fn verify(&self) -> Result<ChainVerification> {
        let entries = self.inner.lock().entries.clone();
        let result = verify_chain(&entries);
        if !result.ok {
            self.poisoned.store(true, Ordering::Release);
        }
        Ok(result)
    }

    async fn query(&self, job_id: &JobId) -> Result<Vec<Receipt>> {
        Ok(self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|r| r.job_id.as_ref() == Some(job_id))
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Receipt>> {
        Ok(self.inner.lock().entries.clone())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.inner.lock().chain.len())
    }
}
