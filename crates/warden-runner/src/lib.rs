//! Job orchestration.
//!
//! The orchestrator turns a validated definition into a running job:
//! it resolves routing and dependencies, drives every step through the
//! executor (and therefore through the policy gate), owns all JobState
//! mutations from a single task per job, and exposes the pause /
//! resume / approve control surface. Independent graph branches run
//! concurrently; one job's history and status are never mutated from
//! two places.

#![deny(unsafe_code)]

mod orchestrator;
mod reconstruct;

pub use orchestrator::{Orchestrator, SubmitOptions};
pub use reconstruct::reconstruct;

use thiserror::Error;
use warden_types::JobId;
use warden_workflow::ValidationIssue;

/// Orchestration errors. Validation and environment errors are fatal
/// before any ledger entry is written.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("definition failed validation with {} issue(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    #[error("no adapter registered for declared capabilities: {}", .0.join(", "))]
    MissingCapabilities(Vec<String>),

    #[error("required secret '{0}' is not present in the environment")]
    MissingSecret(String),

    #[error("unknown job '{0}'")]
    UnknownJob(JobId),

    #[error("job '{0}' is in a terminal state")]
    Terminal(JobId),

    #[error("ledger error: {0}")]
    Ledger(#[from] warden_ledger::LedgerError),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
