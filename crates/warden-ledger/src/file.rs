//! Append-only JSONL file ledger.
//!
//! One receipt per line. A sidecar `<file>.sha256` carries the hex
//! digest of the full file after each append, so a reader can verify
//! integrity offline without the running process.

use crate::{verify_chain, ChainState, ChainVerification, LedgerError, ReceiptLedger, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use warden_types::{JobId, Receipt, ReceiptDraft};

/// File-backed ledger with strictly serialized appends.
pub struct FileLedger {
    path: PathBuf,
    sidecar: PathBuf,
    // One async mutex serializes the whole append (finalize, write,
    // sidecar refresh) so line order always matches chain order.
    inner: Mutex<Inner>,
    poisoned: AtomicBool,
}

struct Inner {
    chain: ChainState,
    entries: Vec<Receipt>,
    file_hasher: Sha256,
}

impl FileLedger {
    /// Open (or create) the ledger at `path`, reloading any existing
    /// chain state from disk.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut entries = Vec::new();
        let mut file_hasher = Sha256::new();
        if path.exists() {
            let bytes = tokio::fs::read(&path).await?;
            file_hasher.update(&bytes);
            for line in String::from_utf8_lossy(&bytes).lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let receipt: Receipt = serde_json::from_str(line)?;
                entries.push(receipt);
            }
        }

        let chain = ChainState::from_entries(&entries);
        tracing::debug!(
            path = %path.display(),
            entries = chain.len(),
            "receipt ledger opened"
        );

        Ok(Self {
            sidecar: sidecar_path(&path),
            path,
            inner: Mutex::new(Inner {
                chain,
                entries,
                file_hasher,
            }),
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".sha256");
    path.with_file_name(name)
}

#[async_trait]
impl ReceiptLedger for FileLedger {
    async fn append(&self, draft: ReceiptDraft) -> Result<Receipt> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(LedgerError::Poisoned);
        }

        let mut inner = self.inner.lock().await;

        let receipt = draft.finalize(inner.chain.head());
        let mut line = serde_json::to_vec(&receipt)?;
        line.push(b'\n');

        // Durable line write first; the head advances the moment the
        // line is flushed, so the in-memory chain always matches what
        // is on disk and a later failure cannot fork it.
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        inner.file_hasher.update(&line);
        inner.chain.advance(&receipt);
        inner.entries.push(receipt.clone());

        // The sidecar is a convenience digest, not part of the chain;
        // a failed refresh leaves it stale until the next append.
        let file_digest = hex::encode(inner.file_hasher.clone().finalize());
        if let Err(err) = tokio::fs::write(&self.sidecar, format!("{file_digest}\n")).await {
            tracing::warn!(
                sidecar = %self.sidecar.display(),
                error = %err,
                "sidecar refresh failed"
            );
        }

        Ok(receipt)
    }

    async fn verify(&self) -> Result<ChainVerification> {
        let entries = self.inner.lock().await.entries.clone();
        let result = verify_chain(&entries);
        if !result.ok {
            self.poisoned.store(true, Ordering::Release);
            tracing::error!(
                path = %self.path.display(),
                first_bad = ?result.first_bad_id,
                "receipt chain failed verification; ledger poisoned"
            );
        }
        Ok(result)
    }

    async fn query(&self, job_id: &JobId) -> Result<Vec<Receipt>> {
        Ok(self
            .inner
            .lock()
            .await
            .entries
            .iter()
            .filter(|r| r.job_id.as_ref() == Some(job_id))
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Receipt>> {
        Ok(self.inner.lock().await.entries.clone())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.inner.lock().await.chain.len())
    }
}

/// Result of offline ledger file verification.
#[derive(Clone, Debug)]
pub struct FileVerification {
    pub chain: ChainVerification,
    /// Whether the sidecar digest matches the file bytes; `None` when no
    /// sidecar is present.
    pub sidecar_ok: Option<bool>,
}

impl FileVerification {
    pub fn ok(&self) -> bool {
        self.chain.ok && self.sidecar_ok.unwrap_or(true)
    }
}

/// Verify a ledger file offline: recompute the hash chain from entry 1
/// and compare the sidecar digest, independent of any running process.
pub async fn verify_file(path: impl AsRef<Path>) -> Result<FileVerification> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await?;

    let mut entries = Vec::new();
    for line in String::from_utf8_lossy(&bytes).lines() {
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str::<Receipt>(line)?);
    }

    let sidecar = sidecar_path(path);
    let sidecar_ok = if sidecar.exists() {
        let recorded = tokio::fs::read_to_string(&sidecar).await?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Some(recorded.trim() == hex::encode(hasher.finalize()))
    } else {
        None
    };

    Ok(FileVerification {
        chain: verify_chain(&entries),
        sidecar_ok,
    })
}
