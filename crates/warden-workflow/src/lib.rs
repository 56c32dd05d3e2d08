//! Workflow definitions and the validator.
//!
//! A [`WorkflowDefinition`] is the declarative blueprint for a
//! multi-step automation: nodes with their capability, action, routing,
//! retry policy, and conditions. Definitions are plain JSON documents.
//! [`validate`] runs every schema, referential, reachability, and scope
//! check before any execution begins; a definition that fails any check
//! is rejected with the full itemized issue list and nothing is
//! partially accepted.

#![deny(unsafe_code)]

mod definition;
mod validator;

pub use definition::{
    RequiredSecret, RetryPolicy, Scheduling, WhenClause, WorkflowDefinition, WorkflowNode,
};
pub use validator::{validate, IssueCode, ValidationIssue};

use thiserror::Error;

/// Definition-level errors.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("definition failed validation with {} issue(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    #[error("definition parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
