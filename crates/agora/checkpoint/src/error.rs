use std::path::PathBuf;

use agora_ledger::LedgerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("checkpoint {path} failed integrity check: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("restored ledger is inconsistent: {0}")]
    Ledger(#[from] LedgerError),

    #[error("not a checkpoint file: {0}")]
    InvalidFileName(PathBuf),
}
