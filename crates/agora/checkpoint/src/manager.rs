//! Checkpoint directory management.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use agora_ledger::Ledger;
use agora_types::WorldState;
use tracing::{debug, info, warn};

use crate::error::CheckpointError;
use crate::format::{Checkpoint, CheckpointReason};

const PREFIX: &str = "checkpoint-";
const SUFFIX: &str = ".json";

/// Reference to a published checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CheckpointHandle {
    pub tick: u64,
    pub path: PathBuf,
}

impl CheckpointHandle {
    /// Handle for an arbitrary checkpoint file, named `checkpoint-<tick>.json`.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let tick = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_tick)
            .ok_or_else(|| CheckpointError::InvalidFileName(path.clone()))?;
        Ok(Self { tick, path })
    }
}

fn parse_tick(name: &str) -> Option<u64> {
    name.strip_prefix(PREFIX)
        .and_then(|s| s.strip_suffix(SUFFIX))
        .and_then(|digits| digits.parse().ok())
}

/// Saves and loads checkpoints in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    /// Newest checkpoints kept after each save; 0 keeps all.
    retain: usize,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, retain: usize) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, retain })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, tick: u64) -> PathBuf {
        self.dir.join(format!("{}{:012}{}", PREFIX, tick, SUFFIX))
    }

    /// Snapshot `ledger` and publish it together with `world`.
    pub fn save(
        &self,
        world: &WorldState,
        ledger: &Ledger,
        reason: CheckpointReason,
    ) -> Result<CheckpointHandle, CheckpointError> {
        let checkpoint = Checkpoint::new(world.clone(), ledger.snapshot(), reason)?;
        self.write(&checkpoint)
    }

    /// Publish an already-built checkpoint atomically.
    pub fn write(&self, checkpoint: &Checkpoint) -> Result<CheckpointHandle, CheckpointError> {
        let path = self.path_for(checkpoint.tick);
        let tmp = self
            .dir
            .join(format!(".{}{:012}{}.tmp", PREFIX, checkpoint.tick, SUFFIX));

        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        publish(&tmp, &path, |file| file.write_all(&bytes))?;
        sync_dir(&self.dir)?;

        info!(
            tick = checkpoint.tick,
            reason = ?checkpoint.reason,
            status = %checkpoint.world.status,
            transactions = checkpoint.ledger.transaction_count(),
            path = %path.display(),
            "Checkpoint saved"
        );

        if self.retain > 0 {
            self.prune(self.retain)?;
        }
        Ok(CheckpointHandle {
            tick: checkpoint.tick,
            path,
        })
    }

    /// Read and verify a checkpoint document without restoring it.
    pub fn read(handle: &CheckpointHandle) -> Result<Checkpoint, CheckpointError> {
        let bytes = fs::read(&handle.path)?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        checkpoint.verify(&handle.path)?;
        Ok(checkpoint)
    }

    /// Restore the world state and ledger captured by `handle`.
    pub fn load(&self, handle: &CheckpointHandle) -> Result<(WorldState, Ledger), CheckpointError> {
        let checkpoint = Self::read(handle)?;
        let ledger = Ledger::restore(checkpoint.ledger)?;
        info!(
            tick = checkpoint.tick,
            status = %checkpoint.world.status,
            path = %handle.path.display(),
            "Checkpoint loaded"
        );
        Ok((checkpoint.world, ledger))
    }

    /// Published checkpoints, oldest first.
    pub fn list(&self) -> Result<Vec<CheckpointHandle>, CheckpointError> {
        let mut handles = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(tick) = name.to_str().and_then(parse_tick) {
                handles.push(CheckpointHandle {
                    tick,
                    path: entry.path(),
                });
            }
        }
        handles.sort();
        Ok(handles)
    }

    pub fn latest(&self) -> Result<Option<CheckpointHandle>, CheckpointError> {
        Ok(self.list()?.pop())
    }

    /// Delete all but the newest `keep` checkpoints.
    pub fn prune(&self, keep: usize) -> Result<usize, CheckpointError> {
        let handles = self.list()?;
        let excess = handles.len().saturating_sub(keep);
        for handle in &handles[..excess] {
            match fs::remove_file(&handle.path) {
                Ok(()) => debug!(tick = handle.tick, "Checkpoint pruned"),
                Err(e) => warn!(tick = handle.tick, error = %e, "Failed to prune checkpoint"),
            }
        }
        Ok(excess)
    }
}

/// Write `tmp` through `fill`, flush it to disk, then rename it over `path`.
/// `tmp` is removed on every failure.
fn publish(
    tmp: &Path,
    path: &Path,
    fill: impl FnOnce(&mut File) -> io::Result<()>,
) -> io::Result<()> {
    let result = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp)
        .and_then(|mut file| {
            fill(&mut file)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(tmp, path));
    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(tmp) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temporary checkpoint");
            }
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), CheckpointError> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), CheckpointError> {
    Ok(())
}
