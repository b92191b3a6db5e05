//! Invocation audit records.

use agora_types::{Amount, PrincipalId, Usage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Succeeded,
    Failed { kind: ErrorKind, message: String },
}

/// One gateway call, successful or not.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub id: Uuid,
    pub principal: PrincipalId,
    pub capability: String,
    pub tick: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: InvocationOutcome,
    /// Scrip charged after reconciliation.
    pub cost: Amount,
    /// Part of the true cost the principal could not cover.
    pub uncovered: Amount,
    pub usage: Option<Usage>,
}

impl InvocationRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome == InvocationOutcome::Succeeded
    }
}
