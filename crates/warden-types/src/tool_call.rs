//! Proposed actions.

use crate::{NodeId, ToolCallId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One proposed externally-visible action, as submitted to the policy
/// gate and (if allowed) handed to an adapter.
///
/// The `idempotency_key` is unique per logical action instance: a replay
/// with the same key must not re-execute an action that already has a
/// completed receipt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub idempotency_key: String,
    pub step_id: NodeId,
    /// Capability tag of the adapter this call targets.
    pub tool: String,
    pub action: String,
    pub args: Value,
    /// Estimated cost used for spend-cap accounting.
    #[serde(default)]
    pub estimated_cost: f64,
    /// Operator approval token, if one has been granted for this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ToolCall {
    pub fn new(
        step_id: NodeId,
        tool: impl Into<String>,
        action: impl Into<String>,
        args: Value,
    ) -> Self {
        let id = ToolCallId::generate();
        Self {
            idempotency_key: format!("{}:{}", step_id, id),
            id,
            step_id,
            tool: tool.into(),
            action: action.into(),
            args,
            estimated_cost: 0.0,
            approval_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn with_approval(mut self, approval_id: impl Into<String>) -> Self {
        self.approval_id = Some(approval_id.into());
        self
    }
}
