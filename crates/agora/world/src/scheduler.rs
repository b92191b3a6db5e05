//! The tick loop.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use agora_checkpoint::{CheckpointHandle, CheckpointManager, CheckpointReason};
use agora_gateway::{ArtifactGateway, WorldGate};
use agora_ledger::Ledger;
use agora_rights::RightsPolicy;
use agora_types::{PrincipalId, WorldState, WorldStatus};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::agent::{Agent, TickContext};
use crate::error::WorldError;
use crate::monitor::{BudgetMeter, WorldMonitor};

/// How agent turns within a tick are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One agent at a time, in principal id order. Deterministic.
    #[default]
    Sequential,
    /// One task per agent; the tick ends when every task has finished.
    Concurrent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// The run completes after this many ticks.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Checkpoint every N ticks; 0 disables periodic checkpoints.
    #[serde(default)]
    pub checkpoint_interval: u64,

    /// Force a checkpoint when the run reaches a terminal state.
    #[serde(default = "default_checkpoint_on_end")]
    pub checkpoint_on_end: bool,

    /// Re-fold the whole ledger after every tick.
    #[serde(default)]
    pub verify_ledger_each_tick: bool,
}

fn default_max_ticks() -> u64 {
    100
}

fn default_checkpoint_on_end() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_ticks: default_max_ticks(),
            execution_mode: ExecutionMode::default(),
            checkpoint_interval: 0,
            checkpoint_on_end: default_checkpoint_on_end(),
            verify_ledger_each_tick: false,
        }
    }
}

/// Outcome of [`World::run`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub final_tick: u64,
    pub status: WorldStatus,
    pub budget: BudgetMeter,
    pub invocations: usize,
    pub failed_invocations: usize,
    pub last_checkpoint: Option<CheckpointHandle>,
}

/// A world run.
pub struct World {
    config: SchedulerConfig,
    ledger: Arc<Ledger>,
    gateway: Arc<ArtifactGateway>,
    monitor: Arc<WorldMonitor>,
    rights: RightsPolicy,
    checkpoints: Option<CheckpointManager>,
    agents: BTreeMap<PrincipalId, Arc<dyn Agent>>,
    tick: u64,
    last_checkpoint: Option<CheckpointHandle>,
}

impl World {
    /// `gateway` must have been built over the same `ledger` and `monitor`.
    pub fn new(
        config: SchedulerConfig,
        ledger: Arc<Ledger>,
        gateway: Arc<ArtifactGateway>,
        monitor: Arc<WorldMonitor>,
        rights: RightsPolicy,
    ) -> Self {
        Self {
            config,
            ledger,
            gateway,
            monitor,
            rights,
            checkpoints: None,
            agents: BTreeMap::new(),
            tick: 0,
            last_checkpoint: None,
        }
    }

    pub fn with_checkpoints(mut self, manager: CheckpointManager) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    pub fn add_agent(&mut self, agent: Arc<dyn Agent>) -> Result<(), WorldError> {
        let principal = agent.principal().clone();
        if !self.ledger.contains(&principal) {
            return Err(WorldError::UnknownAgent(principal));
        }
        if self.agents.contains_key(&principal) {
            return Err(WorldError::DuplicateAgent(principal));
        }
        self.agents.insert(principal, agent);
        Ok(())
    }

    pub fn config(&self) -> &SchedulerConfig {
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

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn status(&self) -> WorldStatus {
        self.monitor.status()
    }

    pub fn state(&self) -> WorldState {
        let meter = self.monitor.meter();
        WorldState {
            tick: self.tick,
            principals: self.ledger.principals(),
            budget_consumed_total: meter.consumed,
            budget_limit: meter.limit,
            status: self.monitor.status(),
        }
    }

    /// Continue from a restored checkpoint. The ledger this world was built
    /// over must be the one restored from the same checkpoint.
    pub fn resume(&mut self, state: &WorldState) -> Result<(), WorldError> {
        if self.ledger.tick() != state.tick {
            return Err(WorldError::Resume(format!(
                "ledger is at tick {} but world state is at tick {}",
                self.ledger.tick(),
                state.tick
            )));
        }
        if let Some(missing) = state.principals.iter().find(|p| !self.ledger.contains(p)) {
            return Err(WorldError::Resume(format!(
                "principal {} is missing from the ledger",
                missing
            )));
        }
        self.monitor
            .restore(state.status, state.budget_consumed_total)
            .map_err(|status| WorldError::Resume(format!("world is already {}", status)))?;
        self.tick = state.tick;
        info!(tick = state.tick, status = %state.status, "World resumed");
        Ok(())
    }

    /// `initializing -> running`.
    pub fn start(&mut self) -> Result<(), WorldError> {
        self.monitor.start().map_err(WorldError::NotRunning)?;
        info!(
            max_ticks = self.config.max_ticks,
            agents = self.agents.len(),
            mode = ?self.config.execution_mode,
            budget = ?self.monitor.meter().limit.map(|l| l.to_string()),
            "World started"
        );
        Ok(())
    }

    /// Drive the world to a terminal state.
    pub async fn run(&mut self) -> Result<RunSummary, WorldError> {
        if self.monitor.status() == WorldStatus::Initializing {
            self.start()?;
        }
        while self.monitor.status() == WorldStatus::Running {
            if self.tick >= self.config.max_ticks {
                self.monitor.complete();
                self.end_checkpoint(false)?;
                break;
            }
            self.step().await?;
        }

        let summary = self.summary();
        info!(
            final_tick = summary.final_tick,
            status = %summary.status,
            consumed = %summary.budget.consumed,
            invocations = summary.invocations,
            failed = summary.failed_invocations,
            "World run finished"
        );
        if summary.status == WorldStatus::HaltedError {
            return Err(WorldError::Halted {
                tick: summary.final_tick,
                reason: self.monitor.fault_reason().unwrap_or_default(),
            });
        }
        Ok(summary)
    }

    /// Run one tick and return the status it ended in.
    pub async fn step(&mut self) -> Result<WorldStatus, WorldError> {
        if self.monitor.status() == WorldStatus::Initializing {
            self.start()?;
        }
        let status = self.monitor.status();
        if status != WorldStatus::Running {
            return Err(WorldError::NotRunning(status));
        }

        self.tick += 1;
        let tick = self.tick;
        self.ledger.set_tick(tick);
        debug!(tick, "Tick started");

        self.apply_resets(tick);
        self.run_agents(tick).await;
        self.check_halts();

        if self.monitor.status() == WorldStatus::Running && tick >= self.config.max_ticks {
            self.monitor.complete();
        }

        let interval = self.config.checkpoint_interval;
        let mut saved = false;
        if self.monitor.status() != WorldStatus::HaltedError
            && interval > 0
            && tick % interval == 0
        {
            self.checkpoint(CheckpointReason::Periodic)?;
            saved = true;
        }
        self.end_checkpoint(saved)?;

        let status = self.monitor.status();
        debug!(tick, status = %status, "Tick finished");
        Ok(status)
    }

    /// Save a checkpoint now, if a checkpoint directory is configured.
    pub fn checkpoint(
        &mut self,
        reason: CheckpointReason,
    ) -> Result<Option<CheckpointHandle>, WorldError> {
        let Some(manager) = &self.checkpoints else {
            return Ok(None);
        };
        match manager.save(&self.state(), &self.ledger, reason) {
            Ok(handle) => {
                self.last_checkpoint = Some(handle.clone());
                Ok(Some(handle))
            }
            Err(e) => {
                self.monitor.fault(&format!("checkpoint failed: {}", e));
                Err(e.into())
            }
        }
    }

    fn end_checkpoint(&mut self, already_saved: bool) -> Result<(), WorldError> {
        let status = self.monitor.status();
        if self.config.checkpoint_on_end
            && status.is_terminal()
            && status != WorldStatus::HaltedError
            && !already_saved
        {
            self.checkpoint(CheckpointReason::Final)?;
        }
        Ok(())
    }

    fn active_principals(&self) -> Vec<PrincipalId> {
        self.ledger
            .principals()
            .into_iter()
            .filter(|p| self.ledger.is_active(p).unwrap_or(false))
            .collect()
    }

    fn apply_resets(&self, tick: u64) {
        let principals = self.active_principals();
        for reset in self.rights.resets_due(&principals, tick) {
            if let Err(e) = self.ledger.apply_reset(&reset) {
                self.monitor.fault(&format!("quota reset failed: {}", e));
                return;
            }
        }
    }

    async fn run_agents(&self, tick: u64) {
        let turns: Vec<(PrincipalId, Arc<dyn Agent>)> = self
            .agents
            .iter()
            .filter(|(id, _)| self.ledger.is_active(id).unwrap_or(false))
            .map(|(id, agent)| (id.clone(), Arc::clone(agent)))
            .collect();

        match self.config.execution_mode {
            ExecutionMode::Sequential => {
                for (principal, agent) in turns {
                    if self.monitor.status() != WorldStatus::Running {
                        debug!(tick, "World halted; remaining turns skipped");
                        break;
                    }
                    let ctx = self.context(tick, &principal);
                    report_turn(tick, &principal, run_turn(agent, ctx).await);
                }
            }
            ExecutionMode::Concurrent => {
                let mut tasks = JoinSet::new();
                for (principal, agent) in turns {
                    if self.monitor.status() != WorldStatus::Running {
                        debug!(tick, "World halted; remaining turns skipped");
                        break;
                    }
                    let ctx = self.context(tick, &principal);
                    tasks.spawn(run_turn(agent, ctx).map(move |outcome| (principal, outcome)));
                }
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok((principal, outcome)) => report_turn(tick, &principal, outcome),
                        Err(e) => warn!(tick, error = %e, "Agent task aborted"),
                    }
                }
            }
        }
    }

    fn check_halts(&self) {
        if self.config.verify_ledger_each_tick {
            if let Err(e) = self.ledger.verify() {
                self.monitor.fault(&e.to_string());
                return;
            }
        }
        self.monitor.check_budget();
    }

    fn context(&self, tick: u64, principal: &PrincipalId) -> TickContext {
        TickContext::new(
            tick,
            principal.clone(),
            Arc::clone(&self.gateway),
            Arc::clone(&self.monitor),
        )
    }

    fn summary(&self) -> RunSummary {
        let records = self.gateway.records();
        RunSummary {
            final_tick: self.tick,
            status: self.monitor.status(),
            budget: self.monitor.meter(),
            invocations: records.len(),
            failed_invocations: records.iter().filter(|r| !r.succeeded()).count(),
            last_checkpoint: self.last_checkpoint.clone(),
        }
    }
}

async fn run_turn(agent: Arc<dyn Agent>, ctx: TickContext) -> Result<(), String> {
    match AssertUnwindSafe(agent.act(&ctx)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(_) => Err("agent panicked".to_string()),
    }
}

fn report_turn(tick: u64, principal: &PrincipalId, outcome: Result<(), String>) {
    if let Err(error) = outcome {
        warn!(tick, principal = %principal, error = %error, "Agent turn failed");
    }
}
