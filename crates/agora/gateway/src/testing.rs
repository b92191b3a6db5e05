//! Test doubles shared by the gateway's unit tests.

use std::sync::Arc;
use std::time::Duration;

use agora_types::{Amount, Usage, WorldStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::capability::{
    Capability, CapabilityFailure, CapabilityOutput, CapabilityRequest, CapabilitySpec,
};
use crate::world_gate::{BudgetDenied, BudgetHold, WorldGate};

/// Minimal world gate: a status cell and an optional budget.
pub struct TestWorld {
    pub state: Mutex<TestWorldState>,
}

pub struct TestWorldState {
    pub status: WorldStatus,
    pub limit: Option<Amount>,
    pub consumed: Amount,
    pub reserved: Amount,
    pub faults: Vec<String>,
}

impl TestWorld {
    pub fn running(limit: Option<Amount>) -> Self {
        Self {
            state: Mutex::new(TestWorldState {
                status: WorldStatus::Running,
                limit,
                consumed: Amount::ZERO,
                reserved: Amount::ZERO,
                faults: Vec::new(),
            }),
        }
    }

    pub fn set_status(&self, status: WorldStatus) {
        self.state.lock().status = status;
    }
}

impl WorldGate for TestWorld {
    fn status(&self) -> WorldStatus {
        self.state.lock().status
    }

    fn reserve(&self, estimate: Amount) -> Result<BudgetHold, BudgetDenied> {
        let mut state = self.state.lock();
        if state.status != WorldStatus::Running {
            return Err(BudgetDenied::NotRunning(state.status));
        }
        let held = match state.limit {
            Some(limit) => {
                if state.consumed >= limit {
                    state.status = WorldStatus::HaltedBudgetExhausted;
                    return Err(BudgetDenied::Exhausted);
                }
                let headroom = limit
                    .saturating_sub(state.consumed)
                    .saturating_sub(state.reserved);
                if headroom.is_zero() && !estimate.is_zero() {
                    return Err(BudgetDenied::Committed);
                }
                estimate.min(headroom)
            }
            None => estimate,
        };
        state.reserved = state.reserved.saturating_add(held);
        Ok(BudgetHold::new(held))
    }

    fn settle(&self, hold: BudgetHold, actual: Amount) {
        let mut state = self.state.lock();
        state.reserved = state.reserved.saturating_sub(hold.amount());
        state.consumed = state.consumed.saturating_add(actual);
        if state.limit.is_some_and(|limit| state.consumed >= limit) {
            state.status = WorldStatus::HaltedBudgetExhausted;
        }
    }

    fn release(&self, hold: BudgetHold) {
        let mut state = self.state.lock();
        state.reserved = state.reserved.saturating_sub(hold.amount());
    }

    fn fault(&self, reason: &str) {
        let mut state = self.state.lock();
        state.status = WorldStatus::HaltedError;
        state.faults.push(reason.to_string());
    }
}

/// Capability reporting a fixed usage.
pub struct FixedUsage {
    pub spec: CapabilitySpec,
    pub usage: Usage,
}

#[async_trait]
impl Capability for FixedUsage {
    fn spec(&self) -> CapabilitySpec {
        self.spec.clone()
    }

    async fn invoke(
        &self,
        request: &CapabilityRequest,
    ) -> Result<CapabilityOutput, CapabilityFailure> {
        Ok(CapabilityOutput {
            content: serde_json::json!({ "echo": request.args.clone() }),
            usage: self.usage,
        })
    }
}

/// Capability that always fails.
pub struct Failing(pub CapabilitySpec);

#[async_trait]
impl Capability for Failing {
    fn spec(&self) -> CapabilitySpec {
        self.0.clone()
    }

    async fn invoke(&self, _: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityFailure> {
        Err(CapabilityFailure::ExecutionFailed("upstream returned 503".into()))
    }
}

/// Capability that panics.
pub struct Panicking(pub CapabilitySpec);

#[async_trait]
impl Capability for Panicking {
    fn spec(&self) -> CapabilitySpec {
        self.0.clone()
    }

    async fn invoke(&self, _: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityFailure> {
        panic!("capability blew up")
    }
}

/// Capability that sleeps before answering.
pub struct Slow {
    pub spec: CapabilitySpec,
    pub delay: Duration,
}

#[async_trait]
impl Capability for Slow {
    fn spec(&self) -> CapabilitySpec {
        self.spec.clone()
    }

    async fn invoke(&self, _: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityFailure> {
        tokio::time::sleep(self.delay).await;
        Ok(CapabilityOutput {
            content: serde_json::Value::Null,
            usage: Usage::default(),
        })
    }
}

/// Capability that reports its usage only once released.
pub struct Held {
    pub spec: CapabilitySpec,
    pub usage: Usage,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl Capability for Held {
    fn spec(&self) -> CapabilitySpec {
        self.spec.clone()
    }

    async fn invoke(&self, _: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityFailure> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(CapabilityOutput {
            content: serde_json::Value::Null,
            usage: self.usage,
        })
    }
}
