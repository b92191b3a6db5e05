//! # agora-types
//!
//! Shared data model for the Agora kernel. Every other crate in the
//! workspace speaks in these types:
//!
//! - **Principals**: the identities that own balances ([`PrincipalId`])
//! - **Amounts**: exact fixed-point quantities for scrip, quota units,
//!   costs and budgets ([`Amount`])
//! - **Accounts & transactions**: the append-only accounting vocabulary
//!   the ledger folds into balances ([`AccountKind`], [`Transaction`])
//! - **Usage**: measured capability consumption fed to the cost model
//! - **World state**: the scheduler-owned view of a run ([`WorldState`])
//!
//! This crate carries data and small invariant-preserving helpers only; it
//! owns no storage and performs no I/O.

#![deny(unsafe_code)]

pub mod account;
pub mod amount;
pub mod ids;
pub mod usage;
pub mod world;

pub use account::{AccountKind, AccountState, QuotaKind, QuotaReset, Transaction, TxOp};
pub use amount::{Amount, AmountError, MICROS_PER_UNIT};
pub use ids::PrincipalId;
pub use usage::Usage;
pub use world::{WorldState, WorldStatus};
