//! World status and the scheduler-owned world state.

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::ids::PrincipalId;

/// Lifecycle of a world run.
///
/// ```text
/// initializing -> running -> { completed | halted_budget_exhausted | halted_error }
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldStatus {
    Initializing,
    Running,
    Completed,
    HaltedBudgetExhausted,
    HaltedError,
}

impl WorldStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorldStatus::Completed | WorldStatus::HaltedBudgetExhausted | WorldStatus::HaltedError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorldStatus::Initializing => "initializing",
            WorldStatus::Running => "running",
            WorldStatus::Completed => "completed",
            WorldStatus::HaltedBudgetExhausted => "halted_budget_exhausted",
            WorldStatus::HaltedError => "halted_error",
        }
    }
}

impl std::fmt::Display for WorldStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a world run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState {
    /// Last completed tick (0 before the first tick).
    pub tick: u64,
    pub principals: Vec<PrincipalId>,
    pub budget_consumed_total: Amount,
    /// `None` means unlimited.
    pub budget_limit: Option<Amount>,
    pub status: WorldStatus,
}

impl WorldState {
    pub fn budget_remaining(&self) -> Option<Amount> {
        self.budget_limit
            .map(|limit| limit.saturating_sub(self.budget_consumed_total))
    }
}
