//! Governed step execution.
//!
//! The executor is the single choke point between a workflow and the
//! outside world: every externally-visible action passes the policy
//! gate first, and every executed step ends with exactly one terminal
//! receipt in the ledger. Adapters behind the [`Adapter`] trait carry
//! out the actual side effects and are never reachable except through
//! [`StepExecutor::run_step`].

#![deny(unsafe_code)]

mod adapter;
mod executor;
mod registry;

pub use adapter::{Adapter, AdapterError, AdapterResponse, Governance};
pub use executor::{StepExecutor, StepResult, StepSpec};
pub use registry::AdapterRegistry;

use thiserror::Error;
use warden_types::{NodeId, PolicyDecision, ReceiptId};

/// Execution errors. `Blocked` and `AwaitingApproval` carry the policy
/// decision already recorded in the ledger.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("step blocked by policy: {}", .decision.reason)]
    Blocked { decision: PolicyDecision },

    #[error("step requires operator approval: {}", .decision.reason)]
    AwaitingApproval { decision: PolicyDecision },

    #[error("step '{node_id}' failed after {attempts} attempt(s): {detail}")]
    StepFailed {
        node_id: NodeId,
        attempts: u32,
        receipt_id: ReceiptId,
        detail: String,
    },

    #[error("policy error: {0}")]
    Policy(#[from] warden_policy::PolicyError),

    #[error("ledger error: {0}")]
    Ledger(#[from] warden_ledger::LedgerError),

    #[error("evidence error: {0}")]
    Evidence(#[from] warden_evidence::EvidenceError),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
