//! World status cell and budget meter.

use agora_gateway::{BudgetDenied, BudgetHold, WorldGate};
use agora_types::{Amount, WorldStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Cumulative API cost against the world budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BudgetMeter {
    /// `None` means unlimited.
    pub limit: Option<Amount>,
    pub consumed: Amount,
    /// Held by in-flight invocations.
    pub reserved: Amount,
}

impl BudgetMeter {
    pub fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.consumed >= limit)
    }

    /// Budget neither consumed nor held.
    pub fn headroom(&self) -> Option<Amount> {
        self.limit.map(|limit| {
            limit
                .saturating_sub(self.consumed)
                .saturating_sub(self.reserved)
        })
    }
}

#[derive(Debug)]
struct MonitorState {
    status: WorldStatus,
    meter: BudgetMeter,
    fault: Option<String>,
}

/// Shared between the scheduler and the gateway.
#[derive(Debug)]
pub struct WorldMonitor {
    state: Mutex<MonitorState>,
}

impl WorldMonitor {
    pub fn new(limit: Option<Amount>) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                status: WorldStatus::Initializing,
                meter: BudgetMeter {
                    limit,
                    ..BudgetMeter::default()
                },
                fault: None,
            }),
        }
    }

    pub fn meter(&self) -> BudgetMeter {
        self.state.lock().meter
    }

    /// Reason recorded by the fault that halted the world, if any.
    pub fn fault_reason(&self) -> Option<String> {
        self.state.lock().fault.clone()
    }

    /// `initializing -> running`.
    pub fn start(&self) -> Result<(), WorldStatus> {
        let mut state = self.state.lock();
        if state.status != WorldStatus::Initializing {
            return Err(state.status);
        }
        state.status = WorldStatus::Running;
        info!("World running");
        Ok(())
    }

    /// `running -> completed`. No-op from any other state.
    pub fn complete(&self) -> bool {
        self.transition(WorldStatus::Completed)
    }

    /// Halt with `halted_budget_exhausted` if the meter has reached its limit.
    pub fn check_budget(&self) -> bool {
        let exhausted = self.state.lock().meter.exhausted();
        exhausted && self.transition(WorldStatus::HaltedBudgetExhausted)
    }

    /// Reinstate status and consumption from a checkpoint. Only valid before
    /// the world has started.
    pub fn restore(&self, status: WorldStatus, consumed: Amount) -> Result<(), WorldStatus> {
        let mut state = self.state.lock();
        if state.status != WorldStatus::Initializing {
            return Err(state.status);
        }
        state.status = status;
        state.meter.consumed = consumed;
        state.meter.reserved = Amount::ZERO;
        Ok(())
    }

    fn transition(&self, to: WorldStatus) -> bool {
        let mut state = self.state.lock();
        Self::transition_locked(&mut state, to)
    }

    fn transition_locked(state: &mut MonitorState, to: WorldStatus) -> bool {
        if state.status != WorldStatus::Running {
            return false;
        }
        state.status = to;
        match to {
            WorldStatus::HaltedBudgetExhausted => warn!(
                consumed = %state.meter.consumed,
                limit = ?state.meter.limit.map(|l| l.to_string()),
                "World budget exhausted"
            ),
            _ => info!(status = %to, "World status changed"),
        }
        true
    }
}

impl WorldGate for WorldMonitor {
    fn status(&self) -> WorldStatus {
        self.state.lock().status
    }

    fn reserve(&self, estimate: Amount) -> Result<BudgetHold, BudgetDenied> {
        let mut state = self.state.lock();
        if state.status != WorldStatus::Running {
            return Err(BudgetDenied::NotRunning(state.status));
        }
        if state.meter.exhausted() {
            Self::transition_locked(&mut state, WorldStatus::HaltedBudgetExhausted);
            return Err(BudgetDenied::Exhausted);
        }
        let held = match state.meter.headroom() {
            Some(headroom) if headroom.is_zero() && !estimate.is_zero() => {
                return Err(BudgetDenied::Committed)
            }
            Some(headroom) => estimate.min(headroom),
            None => estimate,
        };
        state.meter.reserved = state.meter.reserved.saturating_add(held);
        Ok(BudgetHold::new(held))
    }

    fn settle(&self, hold: BudgetHold, actual: Amount) {
        let mut state = self.state.lock();
        state.meter.reserved = state.meter.reserved.saturating_sub(hold.amount());
        state.meter.consumed = state.meter.consumed.saturating_add(actual);
        if state.meter.exhausted() {
            Self::transition_locked(&mut state, WorldStatus::HaltedBudgetExhausted);
        }
    }

    fn release(&self, hold: BudgetHold) {
        let mut state = self.state.lock();
        state.meter.reserved = state.meter.reserved.saturating_sub(hold.amount());
    }

    fn fault(&self, reason: &str) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return;
        }
        error!(reason, "World halted on fatal error");
        state.status = WorldStatus::HaltedError;
        state.fault = Some(reason.to_string());
    }
}
