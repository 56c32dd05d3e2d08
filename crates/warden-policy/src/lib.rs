//! Warden policy gate.
//!
//! Every proposed action passes through [`PolicyGate::evaluate_and_record`]
//! before it may run. Evaluation has a side effect by design: the
//! decision is appended to the receipt ledger even for a `Block`, so
//! authorization history lives in the same tamper-evident chain as
//! execution history.
//!
//! Precedence, in order: a high-risk tool without an approval token
//! always requires approval; an exceeded spend cap blocks and names the
//! cap; an auto-approve match allows; otherwise the global approval
//! threshold decides. A high-risk match dominates a spend-cap pass, and
//! auto-approve never overrides a high-risk or exceeded-cap result.

#![deny(unsafe_code)]

mod config;
mod gate;
mod spend;

pub use config::{CapWindow, PolicyConfig, SpendCaps};
pub use gate::PolicyGate;
pub use spend::SpendTracker;

use thiserror::Error;

/// Policy-related errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("ledger error: {0}")]
    Ledger(#[from] warden_ledger::LedgerError),

    #[error("invalid policy configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
