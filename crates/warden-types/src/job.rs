//! Job state and step history.

use crate::{DefinitionId, JobId, NodeId, ReceiptId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a job.
///
/// `Completed` and `Failed` are terminal and immutable thereafter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Running,
    Paused,
    WaitingHuman,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Terminal status of one executed (or skipped) step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

/// One entry in a job's history: the recorded outcome of a step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub node_id: NodeId,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<ReceiptId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn skipped(node_id: NodeId) -> Self {
        Self {
            node_id,
            status: StepStatus::Skipped,
            receipt_id: None,
            output: None,
            attempts: 0,
            finished_at: Utc::now(),
        }
    }
}

/// Mutable state of one job. Owned exclusively by the orchestrator;
/// everything else sees read-only snapshots.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobState {
    pub id: JobId,
    pub definition_id: DefinitionId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<NodeId>,
    pub history: Vec<StepRecord>,
    /// For a blocked or failed job, the specific decision or step result
    /// that caused the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_on: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn new(definition_id: DefinitionId) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            definition_id,
            status: JobStatus::Running,
            current_step_id: None,
            history: Vec::new(),
            blocked_on: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The recorded outcome of `node`, if it has one.
    pub fn record_for(&self, node: &NodeId) -> Option<&StepRecord> {
        self.history.iter().find(|r| &r.node_id == node)
    }

    /// Whether `node` has already reached `Completed` in history.
    pub fn is_completed(&self, node: &NodeId) -> bool {
        self.record_for(node)
            .is_some_and(|r| r.status == StepStatus::Completed)
    }

    pub fn push_record(&mut self, record: StepRecord) {
        self.history.push(record);
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
