//! # agora-checkpoint
//!
//! Persists `(WorldState, Ledger)` pairs so a run can resume exactly at the
//! checkpointed tick.
//!
//! A checkpoint is one versioned JSON document carrying a blake3 integrity
//! hash over its payload. Saves are atomic to outside observers: the document
//! is written to a temporary file, fsynced, then renamed into place, so a
//! reader sees either the previous checkpoint set or the new one, never a
//! partial file. Loads reject unknown versions and hash mismatches, and the
//! restored ledger re-verifies every transaction log before it is returned.

#![deny(unsafe_code)]

pub mod error;
pub mod format;
pub mod manager;

pub use error::CheckpointError;
pub use format::{Checkpoint, CheckpointReason, CHECKPOINT_VERSION};
pub use manager::{CheckpointHandle, CheckpointManager};
