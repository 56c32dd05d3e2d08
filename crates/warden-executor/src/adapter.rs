//! The adapter boundary.
//!
//! Adapters are the only components that touch external systems. They
//! never see the ledger or the policy gate; by the time `execute` is
//! called the action has already been authorized, and the governance
//! context they receive is informational.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Context handed to an adapter alongside each call. Adapters may log
/// it or propagate it to the external system, but cannot use it to
/// bypass authorization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Governance {
    /// Always `"governed"`. Reserved for future execution modes.
    pub mode: String,
    /// Whether a terminal receipt will be written for this call.
    pub receipt_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub idempotency_key: String,
}

impl Governance {
    pub fn new(idempotency_key: impl Into<String>, approval_id: Option<String>) -> Self {
        Self {
            mode: "governed".to_string(),
            receipt_required: true,
            approval_id,
            idempotency_key: idempotency_key.into(),
        }
    }
}

/// What an adapter reports back for one executed action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub success: bool,
    pub data: Value,
    /// Actual cost incurred, which may differ from the estimate the
    /// policy gate charged.
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl AdapterResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            cost: 0.0,
            duration_ms: 0,
        }
    }
}

/// Adapter failures, split by whether a retry can help.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The call may succeed if retried (rate limit, connection reset).
    #[error("transient adapter failure: {0}")]
    Transient(String),

    /// Retrying cannot help (bad request, missing permission).
    #[error("permanent adapter failure: {0}")]
    Permanent(String),
}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

/// One capability an executor can call out through.
///
/// Implementations must be safe to call concurrently; the executor
/// shares a single instance across steps.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The capability tag this adapter serves, e.g. `"messaging"`.
    /// Matched against a node's `uses` field.
    fn capability(&self) -> &str;

    async fn execute(
        &self,
        action: &str,
        params: &Value,
        governance: &Governance,
    ) -> Result<AdapterResponse, AdapterError>;
}
