//! # agora-world
//!
//! Advances a shared world one discrete tick at a time.
//!
//! Each tick the scheduler applies quota resets, lets every active agent act
//! (agents reach capabilities only through the gateway), checks halt
//! conditions and optionally checkpoints. The world moves through
//!
//! ```text
//! initializing -> running -> { completed | halted_budget_exhausted | halted_error }
//! ```
//!
//! and never leaves a terminal state. [`WorldMonitor`] owns the status and
//! the world budget meter and is the gateway's only view of the world.

#![deny(unsafe_code)]

pub mod agent;
pub mod error;
pub mod monitor;
pub mod scheduler;

pub use agent::{Agent, TickContext};
pub use error::WorldError;
pub use monitor::{BudgetMeter, WorldMonitor};
pub use scheduler::{ExecutionMode, RunSummary, SchedulerConfig, World};
