//! # agora-rights
//!
//! Quota policy: which quota kinds every principal receives, how large the
//! allotments are, and when they replenish.
//!
//! The policy is pure configuration interpretation. It never touches ledger
//! storage; it only produces [`QuotaReset`] instructions tagged with the reset
//! boundary they belong to, and the ledger applies them idempotently.

#![deny(unsafe_code)]

pub mod policy;

pub use policy::{ResetPolicy, RightsConfig, RightsError, RightsPolicy};

pub use agora_types::QuotaReset;
