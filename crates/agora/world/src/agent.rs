//! Agents and the per-tick context they act through.

use std::sync::Arc;

use agora_gateway::{ArtifactGateway, ArtifactResult, WorldGate};
use agora_ledger::LedgerError;
use agora_types::{AccountKind, Amount, PrincipalId, QuotaKind, WorldStatus};
use async_trait::async_trait;
use serde_json::Value;

use crate::monitor::WorldMonitor;

/// Autonomous logic bound to one principal.
///
/// `act` is called once per tick while the principal is active and the world
/// is running. Errors are logged by the scheduler and never halt the world.
#[async_trait]
pub trait Agent: Send + Sync {
    fn principal(&self) -> &PrincipalId;

    async fn act(&self, ctx: &TickContext) -> anyhow::Result<()>;
}

/// What an agent sees during its turn.
#[derive(Clone)]
pub struct TickContext {
    tick: u64,
    principal: PrincipalId,
    gateway: Arc<ArtifactGateway>,
    monitor: Arc<WorldMonitor>,
}

impl TickContext {
    pub(crate) fn new(
        tick: u64,
        principal: PrincipalId,
        gateway: Arc<ArtifactGateway>,
        monitor: Arc<WorldMonitor>,
    ) -> Self {
        Self {
            tick,
            principal,
            gateway,
            monitor,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn principal(&self) -> &PrincipalId {
        &self.principal
    }

    pub fn world_status(&self) -> WorldStatus {
        self.monitor.status()
    }

    /// Invoke a capability as this agent's principal. Never fails; inspect
    /// `success` and `error_kind` on the result.
    pub async fn invoke(&self, capability: &str, args: Value) -> ArtifactResult {
        self.gateway
            .invoke_artifact(&self.principal, capability, args)
            .await
    }

    /// Current scrip balance.
    pub fn balance(&self) -> Result<Amount, LedgerError> {
        self.gateway
            .ledger()
            .balance(&self.principal, &AccountKind::Currency)
    }

    /// Remaining allotment of one quota kind.
    pub fn quota(&self, kind: &QuotaKind) -> Result<Amount, LedgerError> {
        self.gateway
            .ledger()
            .balance(&self.principal, &AccountKind::Quota(kind.clone()))
    }
}
