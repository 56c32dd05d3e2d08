//! Chain verification by recomputation.

use warden_types::{Receipt, ReceiptId};

/// Result of recomputing a receipt chain.
#[derive(Clone, Debug)]
pub struct ChainVerification {
    pub ok: bool,
    /// Entries checked before stopping (all of them when `ok`).
    pub checked: usize,
    /// The first entry whose stored hash or linkage diverges.
    pub first_bad_id: Option<ReceiptId>,
    pub first_bad_index: Option<usize>,
    pub detail: Option<String>,
}

impl ChainVerification {
    fn ok(checked: usize) -> Self {
        Self {
            ok: true,
            checked,
            first_bad_id: None,
            first_bad_index: None,
            detail: None,
        }
    }

    fn bad(index: usize, entry: &Receipt, detail: String) -> Self {
        Self {
            ok: false,
            checked: index,
            first_bad_id: Some(entry.id.clone()),
            first_bad_index: Some(index),
            detail: Some(detail),
        }
    }
}

/// Recompute every hash from entry 1 and report the first divergence.
///
/// Any mutation of any stored field — including `hash` itself — makes
/// the mutated entry the first reported divergence.
pub fn verify_chain(entries: &[Receipt]) -> ChainVerification {
    let mut expected_prev: Option<&str> = None;

    for (index, entry) in entries.iter().enumerate() {
        if entry.prev_hash.as_deref() != expected_prev {
            return ChainVerification::bad(
                index,
                entry,
                format!(
                    "broken link: expected prev {:?}, stored {:?}",
                    expected_prev, entry.prev_hash
                ),
            );
        }

        let recomputed = entry.compute_hash();
        if recomputed != entry.hash {
            return ChainVerification::bad(
                index,
                entry,
                format!("hash mismatch: recomputed {recomputed}, stored {}", entry.hash),
            );
        }

        expected_prev = Some(entry.hash.as_str());
    }

    ChainVerification::ok(entries.len())
}
