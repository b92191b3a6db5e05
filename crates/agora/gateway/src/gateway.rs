//! Metered capability invocation.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use agora_cost::CostModel;
use agora_ledger::{Ledger, LedgerError};
use agora_ratelimit::RateLimiter;
use agora_types::{AccountKind, Amount, PrincipalId, Usage, WorldStatus};
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::{Capability, CapabilityRequest, CapabilitySpec, Pricing};
use crate::error::{ErrorKind, GatewayError};
use crate::record::{InvocationOutcome, InvocationRecord};
use crate::world_gate::{BudgetDenied, BudgetHold, WorldGate};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Applied to capabilities that declare no timeout of their own.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Invocation records retained in memory; 0 keeps all of them.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_records() -> usize {
    100_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_records: default_max_records(),
        }
    }
}

/// A successful, fully reconciled invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub id: Uuid,
    pub capability: String,
    pub content: Value,
    pub usage: Usage,
    /// Scrip charged.
    pub cost: Amount,
    /// True cost the principal could not cover.
    pub uncovered: Amount,
}

/// Uniform result envelope handed to agent logic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactResult {
    pub success: bool,
    pub content: Value,
    pub usage: Option<Usage>,
    pub cost: Amount,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub retry_after_ms: Option<u64>,
}

impl From<Result<Invocation, GatewayError>> for ArtifactResult {
    fn from(result: Result<Invocation, GatewayError>) -> Self {
        match result {
            Ok(invocation) => ArtifactResult {
                success: true,
                content: invocation.content,
                usage: Some(invocation.usage),
                cost: invocation.cost,
                error: None,
                error_kind: None,
                retry_after_ms: None,
            },
            Err(err) => ArtifactResult {
                success: false,
                content: Value::Null,
                usage: None,
                cost: Amount::ZERO,
                error: Some(err.to_string()),
                error_kind: Some(err.kind()),
                retry_after_ms: err
                    .retry_after()
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            },
        }
    }
}

/// Ledger and world reservation taken for one invocation.
struct Reservation {
    charges: Vec<(AccountKind, Amount)>,
    estimate: Amount,
    hold: BudgetHold,
}

/// The artifact gateway.
pub struct ArtifactGateway {
    ledger: Arc<Ledger>,
    world: Arc<dyn WorldGate>,
    cost: CostModel,
    limiter: Arc<RateLimiter>,
    capabilities: DashMap<String, Arc<dyn Capability>>,
    records: Mutex<VecDeque<InvocationRecord>>,
    config: GatewayConfig,
}

impl ArtifactGateway {
    pub fn new(
        ledger: Arc<Ledger>,
        world: Arc<dyn WorldGate>,
        cost: CostModel,
        limiter: Arc<RateLimiter>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            ledger,
            world,
            cost,
            limiter,
            capabilities: DashMap::new(),
            records: Mutex::new(VecDeque::new()),
            config,
        }
    }

    /// Register a capability under its spec name, replacing any previous one.
    pub fn register(&self, capability: Arc<dyn Capability>) {
        let spec = capability.spec();
        info!(capability = %spec.name, pricing = ?spec.pricing, "Capability registered");
        self.capabilities.insert(spec.name, capability);
    }

    pub fn capability_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost
    }

    /// Invoke `capability` on behalf of `principal`, charging its balances.
    pub async fn invoke(
        &self,
        principal: &PrincipalId,
        capability: &str,
        args: Value,
    ) -> Result<Invocation, GatewayError> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let tick = self.ledger.tick();

        let result = self.invoke_inner(id, principal, capability, args, tick).await;

        if let Err(err) = &result {
            if err.kind() == ErrorKind::Fatal {
                error!(principal = %principal, capability, error = %err, "Fatal accounting fault");
                self.world.fault(&err.to_string());
            }
        }

        let (outcome, cost, uncovered, usage) = match &result {
            Ok(invocation) => (
                InvocationOutcome::Succeeded,
                invocation.cost,
                invocation.uncovered,
                Some(invocation.usage),
            ),
            Err(err) => (
                InvocationOutcome::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                },
                Amount::ZERO,
                Amount::ZERO,
                None,
            ),
        };
        self.push_record(InvocationRecord {
            id,
            principal: principal.clone(),
            capability: capability.to_string(),
            tick,
            started_at,
            finished_at: Utc::now(),
            outcome,
            cost,
            uncovered,
            usage,
        });

        result
    }

    /// [`invoke`](Self::invoke), folded into a never-failing envelope.
    pub async fn invoke_artifact(
        &self,
        principal: &PrincipalId,
        capability: &str,
        args: Value,
    ) -> ArtifactResult {
        self.invoke(principal, capability, args).await.into()
    }

    /// Every retained invocation record, oldest first.
    pub fn records(&self) -> Vec<InvocationRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn records_for(&self, principal: &PrincipalId) -> Vec<InvocationRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| &r.principal == principal)
            .cloned()
            .collect()
    }

    async fn invoke_inner(
        &self,
        id: Uuid,
        principal: &PrincipalId,
        capability: &str,
        args: Value,
        tick: u64,
    ) -> Result<Invocation, GatewayError> {
        // 1. Validate
        let handler = self
            .capabilities
            .get(capability)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| GatewayError::UnknownCapability(capability.to_string()))?;
        if !self.ledger.is_active(principal)? {
            return Err(GatewayError::InactivePrincipal(principal.clone()));
        }
        if let Err(retry_after) = self.limiter.acquire(principal, capability) {
            warn!(
                principal = %principal,
                capability,
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "Invocation rate limited"
            );
            return Err(GatewayError::RateLimited {
                principal: principal.clone(),
                capability: capability.to_string(),
                retry_after,
            });
        }

        // 2. World status
        match self.world.status() {
            WorldStatus::Running => {}
            WorldStatus::HaltedBudgetExhausted => {
                return Err(GatewayError::InsufficientBudget {
                    principal: principal.clone(),
                    reason: "world budget exhausted".into(),
                })
            }
            status => return Err(GatewayError::WorldHalted(status)),
        }

        // 3. Reserve
        let spec = handler.spec();
        let reservation = self.reserve(principal, &spec)?;

        // 4. Invoke, with no lock held
        let request = CapabilityRequest {
            invocation_id: id,
            principal: principal.clone(),
            capability: capability.to_string(),
            args,
            tick,
        };
        let timeout = Duration::from_millis(spec.timeout_ms.unwrap_or(self.config.default_timeout_ms));
        let outcome = tokio::time::timeout(
            timeout,
            AssertUnwindSafe(handler.invoke(&request)).catch_unwind(),
        )
        .await;

        let output = match outcome {
            Ok(Ok(Ok(output))) => output,
            Ok(Ok(Err(failure))) => {
                self.unwind(principal, reservation, "capability failed")?;
                return Err(GatewayError::CapabilityError {
                    capability: capability.to_string(),
                    message: failure.to_string(),
                });
            }
            Ok(Err(panic)) => {
                self.unwind(principal, reservation, "capability panicked")?;
                return Err(GatewayError::CapabilityError {
                    capability: capability.to_string(),
                    message: format!("capability panicked: {}", panic_message(panic.as_ref())),
                });
            }
            Err(_elapsed) => {
                self.unwind(principal, reservation, "capability timed out")?;
                return Err(GatewayError::Timeout {
                    capability: capability.to_string(),
                    after: timeout,
                });
            }
        };

        // 5. Reconcile
        let cost = match spec.pricing {
            Pricing::Free => Amount::ZERO,
            Pricing::Reserved { .. } | Pricing::PostHoc => self.cost.compute_cost(&output.usage),
        };
        let uncovered = self.reconcile(principal, capability, reservation, cost)?;

        debug!(
            principal = %principal,
            capability,
            input_units = output.usage.input_units,
            output_units = output.usage.output_units,
            cost = %cost,
            "Invocation settled"
        );

        Ok(Invocation {
            id,
            capability: capability.to_string(),
            content: output.content,
            usage: output.usage,
            cost: cost.saturating_sub(uncovered),
            uncovered,
        })
    }

    /// Take the world hold, then debit the estimate and quota charges
    /// atomically. Nothing is left held on failure.
    fn reserve(
        &self,
        principal: &PrincipalId,
        spec: &CapabilitySpec,
    ) -> Result<Reservation, GatewayError> {
        let estimate = match spec.pricing {
            Pricing::Reserved { ceiling } => self.cost.estimate(&ceiling),
            Pricing::Free | Pricing::PostHoc => Amount::ZERO,
        };

        let hold = self.world.reserve(estimate).map_err(|denied| match denied {
            BudgetDenied::NotRunning(status) if status != WorldStatus::HaltedBudgetExhausted => {
                GatewayError::WorldHalted(status)
            }
            BudgetDenied::NotRunning(_) | BudgetDenied::Exhausted => {
                GatewayError::InsufficientBudget {
                    principal: principal.clone(),
                    reason: "world budget exhausted".into(),
                }
            }
            BudgetDenied::Committed => GatewayError::InsufficientBudget {
                principal: principal.clone(),
                reason: "remaining world budget is held by in-flight invocations".into(),
            },
        })?;

        let mut charges = Vec::with_capacity(spec.quota_charges.len() + 1);
        if !estimate.is_zero() {
            charges.push((AccountKind::Currency, estimate));
        }
        for (kind, amount) in &spec.quota_charges {
            charges.push((AccountKind::Quota(kind.clone()), *amount));
        }

        let reason = format!("reserve {}", spec.name);
        if let Err(err) = self.ledger.debit_all(principal, &charges, &reason) {
            self.world.release(hold);
            return Err(match err {
                LedgerError::InsufficientBalance {
                    account,
                    requested,
                    available,
                    ..
                } => GatewayError::InsufficientBudget {
                    principal: principal.clone(),
                    reason: format!(
                        "{} reservation of {} exceeds available {}",
                        account, requested, available
                    ),
                },
                other => other.into(),
            });
        }

        Ok(Reservation {
            charges,
            estimate,
            hold,
        })
    }

    /// Refund a reservation in full after a failed invocation.
    fn unwind(
        &self,
        principal: &PrincipalId,
        reservation: Reservation,
        reason: &str,
    ) -> Result<(), GatewayError> {
        self.world.release(reservation.hold);
        if reservation.charges.is_empty() {
            return Ok(());
        }
        self.ledger
            .refund_all(principal, &reservation.charges, &format!("refund: {}", reason))?;
        warn!(
            principal = %principal,
            estimate = %reservation.estimate,
            reason,
            "Reservation refunded"
        );
        Ok(())
    }

    /// Settle the true cost against the reservation. Returns the part of the
    /// cost that could not be charged.
    fn reconcile(
        &self,
        principal: &PrincipalId,
        capability: &str,
        reservation: Reservation,
        cost: Amount,
    ) -> Result<Amount, GatewayError> {
        let estimate = reservation.estimate;
        self.world.settle(reservation.hold, cost);

        if cost < estimate {
            let over = estimate.saturating_sub(cost);
            self.ledger.refund(
                principal,
                &AccountKind::Currency,
                over,
                &format!("overestimate {}", capability),
            )?;
            return Ok(Amount::ZERO);
        }

        let shortfall = cost.saturating_sub(estimate);
        if shortfall.is_zero() {
            return Ok(Amount::ZERO);
        }
        let reason = format!("charge {}", capability);
        match self
            .ledger
            .debit(principal, &AccountKind::Currency, shortfall, &reason)
        {
            Ok(_) => Ok(Amount::ZERO),
            Err(LedgerError::InsufficientBalance { .. }) => {
                let charged = self.ledger.debit_available(
                    principal,
                    &AccountKind::Currency,
                    shortfall,
                    &reason,
                )?;
                let uncovered = shortfall.saturating_sub(charged);
                warn!(
                    principal = %principal,
                    capability,
                    cost = %cost,
                    uncovered = %uncovered,
                    "Cost exceeds balance; charged what was available"
                );
                Ok(uncovered)
            }
            Err(other) => Err(other.into()),
        }
    }

    fn push_record(&self, record: InvocationRecord) {
        let mut records = self.records.lock();
        records.push_back(record);
        if self.config.max_records > 0 {
            while records.len() > self.config.max_records {
                records.pop_front();
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
