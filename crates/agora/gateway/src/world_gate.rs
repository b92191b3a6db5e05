//! The gateway's view of world state.

use agora_types::{Amount, WorldStatus};

/// A world-budget reservation taken alongside a ledger reservation.
///
/// Must be either settled or released exactly once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a budget hold must be settled or released"]
pub struct BudgetHold {
    amount: Amount,
}

impl BudgetHold {
    pub fn new(amount: Amount) -> Self {
        Self { amount }
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }
}

/// Why a budget hold was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDenied {
    /// Cumulative charges have reached the world budget.
    Exhausted,
    /// In-flight holds already cover the remaining budget.
    Committed,
    /// The world is not accepting invocations.
    NotRunning(WorldStatus),
}

/// Budget and lifecycle controls the scheduler exposes to the gateway.
pub trait WorldGate: Send + Sync {
    fn status(&self) -> WorldStatus;

    /// Hold up to `estimate` of the remaining world budget.
    fn reserve(&self, estimate: Amount) -> Result<BudgetHold, BudgetDenied>;

    /// Replace a hold with the actual cost charged.
    fn settle(&self, hold: BudgetHold, actual: Amount);

    /// Drop a hold without charging.
    fn release(&self, hold: BudgetHold);

    /// Report a fatal accounting fault; the world halts with an error.
    fn fault(&self, reason: &str);
}
