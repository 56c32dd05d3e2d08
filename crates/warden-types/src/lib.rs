//! Warden domain types.
//!
//! The shared vocabulary of the engine: proposed actions ([`ToolCall`]),
//! authorization outcomes ([`PolicyDecision`]), hash-chained ledger
//! entries ([`Receipt`]), and mutable job state ([`JobState`]).
//! Behavior lives in the crates that own each concern; this crate only
//! defines the data and the receipt hash computation, so every component
//! agrees on what a receipt's digest covers.

#![deny(unsafe_code)]

mod decision;
mod id;
mod job;
mod receipt;
mod tool_call;

pub use decision::{Decision, PolicyDecision};
pub use id::{DefinitionId, JobId, NodeId, ReceiptId, ToolCallId};
pub use job::{JobState, JobStatus, StepRecord, StepStatus};
pub use receipt::{Receipt, ReceiptAction, ReceiptDraft};
pub use tool_call::ToolCall;
