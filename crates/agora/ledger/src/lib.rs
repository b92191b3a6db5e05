//! # agora-ledger
//!
//! Authoritative store of principal balances: scrip, quotas and cumulative
//! consumption.
//!
//! ## Invariants
//!
//! - **Append-only**: every state change is a [`Transaction`] appended to the
//!   principal's log. Balances are a fold over that log; the cached aggregate
//!   is updated inside the same critical section that appends.
//! - **No overdraft**: a debit that would drive a balance below zero is
//!   rejected, never clamped. The single exception is
//!   [`Ledger::debit_available`], which callers must opt into explicitly.
//! - **All-or-nothing quotas**: [`Ledger::debit_all`] applies every charge of
//!   a reservation or none of them.
//! - **Per-principal serialization**: mutations for one principal are
//!   serialized by that principal's own lock; distinct principals never block
//!   each other.
//! - **Fail loudly**: [`Ledger::verify`] re-folds every log; a mismatch is a
//!   fatal [`LedgerError::Inconsistent`], never repaired.
//!
//! [`Transaction`]: agora_types::Transaction

#![deny(unsafe_code)]

mod book;
pub mod error;
pub mod history;
pub mod ledger;
pub mod snapshot;

pub use error::LedgerError;
pub use history::History;
pub use ledger::Ledger;
pub use snapshot::{LedgerSnapshot, PrincipalSnapshot};
