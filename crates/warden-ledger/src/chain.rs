//! Chain head bookkeeping.

use warden_types::Receipt;

/// The head of a receipt chain: last hash and entry count.
#[derive(Clone, Debug, Default)]
pub struct ChainState {
    head: Option<String>,
    len: u64,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild head state from previously persisted entries.
    pub fn from_entries(entries: &[Receipt]) -> Self {
        Self {
            head: entries.last().map(|r| r.hash.clone()),
            len: entries.len() as u64,
        }
    }

    /// The `prev_hash` the next appended receipt must carry.
    pub fn head(&self) -> Option<String> {
        self.head.clone()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Advance the head past a durably committed receipt.
    pub fn advance(&mut self, receipt: &Receipt) {
        self.head = Some(receipt.hash.clone());
        self.len += 1;
    }
}
