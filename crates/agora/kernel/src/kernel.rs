//! Wires a [`KernelConfig`] into a runnable [`World`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agora_checkpoint::{CheckpointError, CheckpointHandle, CheckpointManager};
use agora_cost::CostModel;
use agora_gateway::{ArtifactGateway, Capability, EchoCapability, GatewayConfig};
use agora_ledger::{Ledger, LedgerError};
use agora_ratelimit::RateLimiter;
use agora_rights::{RightsError, RightsPolicy};
use agora_types::{PrincipalId, Usage, WorldState, WorldStatus};
use agora_world::{World, WorldError, WorldMonitor};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, KernelConfig};
use crate::llm::SimulatedLlm;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("rights policy error: {0}")]
    Rights(#[from] RightsError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("world error: {0}")]
    World(#[from] WorldError),

    #[error("resuming requires checkpoint.dir to be configured")]
    NoCheckpointDir,

    #[error("no checkpoint found in {0}")]
    NoCheckpoint(PathBuf),
}

/// Every shared component of one world, assembled but not yet running.
pub struct Kernel {
    config: KernelConfig,
    ledger: Arc<Ledger>,
    monitor: Arc<WorldMonitor>,
    gateway: Arc<ArtifactGateway>,
    rights: RightsPolicy,
    checkpoints: Option<CheckpointManager>,
    resume_state: Option<WorldState>,
}

impl Kernel {
    /// Fresh world: every configured principal opened with its starting
    /// scrip and the default quotas.
    pub fn bootstrap(config: KernelConfig) -> Result<Self, KernelError> {
        config.validate()?;
        let rights = RightsPolicy::new(config.rights_config()?)?;
        let ledger = Ledger::new();
        let quotas = rights.default_quotas();
        for (principal, scrip) in config.principals()? {
            ledger.open_principal(principal, scrip, &quotas)?;
        }
        Self::assemble(config, rights, ledger, None)
    }

    /// Continue from the newest checkpoint in `checkpoint.dir`.
    pub fn resume_latest(config: KernelConfig) -> Result<Self, KernelError> {
        let manager = checkpoint_manager(&config)?.ok_or(KernelError::NoCheckpointDir)?;
        let handle = manager
            .latest()?
            .ok_or_else(|| KernelError::NoCheckpoint(manager.dir().to_path_buf()))?;
        Self::resume_from(config, &handle)
    }

    /// Continue from a specific checkpoint.
    ///
    /// A run that completed below the configured `max_ticks` is reopened so
    /// the operator can extend it; halted runs stay halted.
    pub fn resume_from(config: KernelConfig, handle: &CheckpointHandle) -> Result<Self, KernelError> {
        config.validate()?;
        let rights = RightsPolicy::new(config.rights_config()?)?;
        let dir = handle.path.parent().unwrap_or_else(|| Path::new("."));
        let (mut state, ledger) = CheckpointManager::new(dir, 0)?.load(handle)?;

        if state.status == WorldStatus::Completed && state.tick < config.world.max_ticks {
            info!(
                tick = state.tick,
                max_ticks = config.world.max_ticks,
                "Reopening completed run"
            );
            state.status = WorldStatus::Running;
        }
        for (principal, _) in config.principals()? {
            if !ledger.contains(&principal) {
                warn!(principal = %principal, "Configured principal absent from checkpoint; not opened");
            }
        }
        Self::assemble(config, rights, ledger, Some(state))
    }

    fn assemble(
        config: KernelConfig,
        rights: RightsPolicy,
        ledger: Ledger,
        resume_state: Option<WorldState>,
    ) -> Result<Self, KernelError> {
        let ledger = Arc::new(ledger);
        let budget = config.budget_limit()?;
        let monitor = Arc::new(WorldMonitor::new(budget));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_config()));
        let gateway = Arc::new(ArtifactGateway::new(
            Arc::clone(&ledger),
            monitor.clone(),
            CostModel::new(config.cost_rates()?),
            limiter,
            GatewayConfig::default(),
        ));
        gateway.register(Arc::new(SimulatedLlm::new(
            config.llm.default_model.clone(),
            Usage::new(config.llm.max_input_units, config.llm.max_output_units),
        )));
        gateway.register(Arc::new(EchoCapability));
        let checkpoints = checkpoint_manager(&config)?;

        info!(
            principals = ledger.principals().len(),
            max_ticks = config.world.max_ticks,
            budget = ?budget.map(|b| b.to_string()),
            checkpoints = ?checkpoints.as_ref().map(|m| m.dir().display().to_string()),
            resumed_at = ?resume_state.as_ref().map(|s| s.tick),
            "Kernel assembled"
        );

        Ok(Self {
            config,
            ledger,
            monitor,
            gateway,
            rights,
            checkpoints,
            resume_state,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn gateway(&self) -> &Arc<ArtifactGateway> {
        &self.gateway
    }

    pub fn monitor(&self) -> &Arc<WorldMonitor> {
        &self.monitor
    }

    pub fn principals(&self) -> Vec<PrincipalId> {
        self.ledger.principals()
    }

    /// Tick of the checkpoint this kernel was resumed from.
    pub fn resumed_at(&self) -> Option<u64> {
        self.resume_state.as_ref().map(|s| s.tick)
    }

    pub fn register_capability(&self, capability: Arc<dyn Capability>) {
        self.gateway.register(capability);
    }

    /// Build the scheduler. Agents are added on the returned world.
    pub fn into_world(self) -> Result<World, KernelError> {
        let mut world = World::new(
            self.config.scheduler_config(),
            self.ledger,
            self.gateway,
            self.monitor,
            self.rights,
        );
        if let Some(manager) = self.checkpoints {
            world = world.with_checkpoints(manager);
        }
        if let Some(state) = &self.resume_state {
            world.resume(state)?;
        }
        Ok(world)
    }
}

fn checkpoint_manager(config: &KernelConfig) -> Result<Option<CheckpointManager>, KernelError> {
    config
        .checkpoint
        .dir
        .as_ref()
        .map(|dir| CheckpointManager::new(dir, config.checkpoint.retain))
        .transpose()
        .map_err(KernelError::from)
}
