//! # agora-gateway
//!
//! The only path by which agents reach external capabilities. Every
//! invocation is metered against the caller's ledger balances and the world
//! budget:
//!
//! ```text
//! validate -> rate limit -> world status -> reserve -> invoke -> reconcile -> record
//! ```
//!
//! Reservation is the first phase of a two-phase commit over the ledger: a
//! conservative estimate is debited before the capability runs and the true
//! cost is settled afterwards. No ledger lock is held while the capability is
//! awaited. Failures, timeouts and panics inside a capability refund the
//! reservation in full.
//!
//! [`ArtifactGateway::invoke_artifact`] wraps all of this in a uniform
//! [`ArtifactResult`] so no error crosses into agent logic.

#![deny(unsafe_code)]

pub mod capability;
pub mod error;
pub mod gateway;
pub mod record;
pub mod world_gate;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{
    Capability, CapabilityFailure, CapabilityOutput, CapabilityRequest, CapabilitySpec,
    EchoCapability, Pricing,
};
pub use error::{ErrorKind, GatewayError};
pub use gateway::{ArtifactGateway, ArtifactResult, GatewayConfig, Invocation};
pub use record::{InvocationOutcome, InvocationRecord};
pub use world_gate::{BudgetDenied, BudgetHold, WorldGate};
