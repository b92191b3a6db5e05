//! On-disk checkpoint document.

use agora_ledger::LedgerSnapshot;
use agora_types::WorldState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;

/// Current document version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Why a checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    /// Every `checkpoint_interval` ticks.
    Periodic,
    /// Forced at a terminal state by `checkpoint_on_end`.
    Final,
    /// Requested by an operator or a test.
    Manual,
}

/// A complete, self-verifying checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub tick: u64,
    pub taken_at: DateTime<Utc>,
    pub reason: CheckpointReason,
    pub world: WorldState,
    pub ledger: LedgerSnapshot,
    /// Hex blake3 hash of every other field.
    pub integrity_hash: String,
}

/// The hashed portion of a checkpoint, borrowed.
#[derive(Serialize)]
struct Payload<'a> {
    version: u32,
    tick: u64,
    taken_at: &'a DateTime<Utc>,
    reason: CheckpointReason,
    world: &'a WorldState,
    ledger: &'a LedgerSnapshot,
}

impl Checkpoint {
    pub fn new(
        world: WorldState,
        ledger: LedgerSnapshot,
        reason: CheckpointReason,
    ) -> Result<Self, CheckpointError> {
        let mut checkpoint = Self {
            version: CHECKPOINT_VERSION,
            tick: world.tick,
            taken_at: Utc::now(),
            reason,
            world,
            ledger,
            integrity_hash: String::new(),
        };
        checkpoint.integrity_hash = checkpoint.compute_hash()?;
        Ok(checkpoint)
    }

    /// Hash of the payload as it currently stands.
    pub fn compute_hash(&self) -> Result<String, CheckpointError> {
        let payload = Payload {
            version: self.version,
            tick: self.tick,
            taken_at: &self.taken_at,
            reason: self.reason,
            world: &self.world,
            ledger: &self.ledger,
        };
        let bytes = serde_json::to_vec(&payload)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    /// Version and integrity checks; `path` only labels the error.
    pub fn verify(&self, path: &std::path::Path) -> Result<(), CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        let actual = self.compute_hash()?;
        if actual != self.integrity_hash {
            return Err(CheckpointError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: self.integrity_hash.clone(),
                actual,
            });
        }
        Ok(())
    }
}
