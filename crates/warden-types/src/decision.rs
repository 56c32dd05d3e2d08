//! Policy decisions.

use crate::ToolCallId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three authorization outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Block,
    RequireApproval,
}

/// The recorded outcome of evaluating one [`ToolCall`](crate::ToolCall)
/// against policy. Immutable once written; attached to exactly one call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub reason: String,
    pub tool_call_id: ToolCallId,
    pub timestamp: DateTime<Utc>,
}

impl PolicyDecision {
    pub fn new(decision: Decision, reason: impl Into<String>, tool_call_id: ToolCallId) -> Self {
        Self {
            decision,
            reason: reason.into(),
            tool_call_id,
            timestamp: Utc::now(),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.decision == Decision::Allow
    }
}
