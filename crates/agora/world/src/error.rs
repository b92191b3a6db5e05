use agora_checkpoint::CheckpointError;
use agora_ledger::LedgerError;
use agora_types::{PrincipalId, WorldStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorldError {
    /// The run ended in `halted_error`.
    #[error("world halted at tick {tick}: {reason}")]
    Halted { tick: u64, reason: String },

    #[error("world is not running: {0}")]
    NotRunning(WorldStatus),

    #[error("no ledger principal for agent {0}")]
    UnknownAgent(PrincipalId),

    #[error("agent already registered for {0}")]
    DuplicateAgent(PrincipalId),

    #[error("cannot resume: {0}")]
    Resume(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}
