//! Hash-chained ledger receipts.

use crate::{JobId, ReceiptId, ToolCallId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use warden_evidence::{canonicalize, sha256_hex};

/// What a receipt records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptAction {
    PolicyEvaluated,
    StepCompleted,
    StepFailed,
    JobSubmitted,
    JobCompleted,
    JobFailed,
}

/// One immutable, hash-linked ledger entry recording an authorized
/// action and its outcome.
///
/// `hash = sha256(canonical(id, actor, action, timestamp, result) ∥ prev_hash)`,
/// so recomputing from the first entry must reproduce every stored hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Receipt {
    pub id: ReceiptId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub actor: String,
    pub action: ReceiptAction,
    pub timestamp: DateTime<Utc>,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    pub hash: String,
}

impl Receipt {
    /// Recompute this receipt's hash from its stored fields.
    pub fn compute_hash(&self) -> String {
        hash_fields(
            &self.id,
            &self.actor,
            &self.action,
            self.timestamp,
            &self.result,
            self.prev_hash.as_deref(),
        )
    }
}

/// A receipt before it has been linked into a chain. The ledger assigns
/// `prev_hash` and computes `hash` at append time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiptDraft {
    pub tool_call_id: Option<ToolCallId>,
    pub job_id: Option<JobId>,
    pub actor: String,
    pub action: ReceiptAction,
    pub result: Value,
}

impl ReceiptDraft {
    pub fn new(actor: impl Into<String>, action: ReceiptAction, result: Value) -> Self {
        Self {
            tool_call_id: None,
            job_id: None,
            actor: actor.into(),
            action,
            result,
        }
    }

    pub fn for_tool_call(mut self, tool_call_id: ToolCallId) -> Self {
        self.tool_call_id = Some(tool_call_id);
        self
    }

    pub fn for_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Link this draft behind `prev_hash`, producing a sealed receipt.
    pub fn finalize(self, prev_hash: Option<String>) -> Receipt {
        let id = ReceiptId::generate();
        let timestamp = Utc::now();
        let hash = hash_fields(
            &id,
            &self.actor,
            &self.action,
            timestamp,
            &self.result,
            prev_hash.as_deref(),
        );

        Receipt {
            id,
            tool_call_id: self.tool_call_id,
            job_id: self.job_id,
            actor: self.actor,
            action: self.action,
            timestamp,
            result: self.result,
            prev_hash,
            hash,
        }
    }
}

fn hash_fields(
    id: &ReceiptId,
    actor: &str,
    action: &ReceiptAction,
    timestamp: DateTime<Utc>,
    result: &Value,
    prev_hash: Option<&str>,
) -> String {
    let body = json!({
        "id": id,
        "actor": actor,
        "action": action,
        "timestamp": timestamp.to_rfc3339(),
        "result": result,
    });

    let mut bytes = canonicalize(&body);
    bytes.extend_from_slice(prev_hash.unwrap_or("").as_bytes());
    sha256_hex(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> ReceiptDraft {
        ReceiptDraft::new(
            "executor",
            ReceiptAction::StepCompleted,
            json!({"node_id": "n1", "attempts": 1}),
        )
        .for_job(JobId::new("job-1"))
    }

    #[test]
    fn test_finalize_produces_verifiable_hash() {
        let receipt = draft().finalize(None);
        assert_eq!(receipt.compute_hash(), receipt.hash);
        assert!(receipt.prev_hash.is_none());
    }

    #[test]
    fn test_chaining_changes_hash() {
        let first = draft().finalize(None);
        let linked = draft().finalize(Some(first.hash.clone()));
        let unlinked = draft().finalize(None);

        assert_eq!(linked.prev_hash.as_deref(), Some(first.hash.as_str()));
        // Same body, different link point, different digest.
        assert_ne!(linked.hash, unlinked.hash);
    }

    #[test]
    fn test_mutating_result_invalidates_hash() {
        let mut receipt = draft().finalize(None);
        receipt.result = json!({"node_id": "n1", "attempts": 2});
        assert_ne!(receipt.compute_hash(), receipt.hash);
    }

    #[test]
    fn test_receipt_round_trips_through_json() {
        let receipt = draft()
            .for_tool_call(ToolCallId::new("tc-1"))
            .finalize(Some("abc".into()));
        let line = serde_json::to_string(&receipt).unwrap();
        let back: Receipt = serde_json::from_str(&line).unwrap();
        assert_eq!(back.hash, receipt.hash);
        assert_eq!(back.compute_hash(), receipt.hash);
    }
}
