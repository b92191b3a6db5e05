//! Accounting vocabulary: account kinds, account state and transactions.

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::ids::PrincipalId;

/// A kind of bounded, replenishable resource allotment (compute, disk, ...).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaKind(String);

impl QuotaKind {
    pub const COMPUTE: &'static str = "compute";
    pub const DISK: &'static str = "disk";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn compute() -> Self {
        Self::new(Self::COMPUTE)
    }

    pub fn disk() -> Self {
        Self::new(Self::DISK)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which account of a principal a transaction touches.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// The scrip balance.
    Currency,
    /// A quota allotment.
    Quota(QuotaKind),
}

impl AccountKind {
    pub fn quota(kind: impl Into<String>) -> Self {
        AccountKind::Quota(QuotaKind::new(kind))
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, AccountKind::Quota(_))
    }
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountKind::Currency => write!(f, "currency"),
            AccountKind::Quota(kind) => write!(f, "quota:{}", kind),
        }
    }
}

/// Cached aggregate of one account.
///
/// Currency accounts have no limit. Quota accounts carry their `limit`;
/// `balance` is what remains available, so `consumed = limit - balance`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub kind: AccountKind,
    pub balance: Amount,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub limit: Option<Amount>,
    /// Cumulative debits (consumption counter).
    pub total_debited: Amount,
    /// Cumulative credits and refunds, excluding the opening balance.
    pub total_credited: Amount,
    /// Reset boundary most recently applied (quota accounts only).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_reset: Option<u64>,
}

impl AccountState {
    /// A freshly opened account; balances are populated by the `Open`
    /// transaction that follows.
    pub fn empty(kind: AccountKind) -> Self {
        let limit = if kind.is_quota() { Some(Amount::ZERO) } else { None };
        Self {
            kind,
            balance: Amount::ZERO,
            limit,
            total_debited: Amount::ZERO,
            total_credited: Amount::ZERO,
            last_reset: None,
        }
    }

    /// Quota consumed since the last reset, `None` for currency.
    pub fn consumed(&self) -> Option<Amount> {
        self.limit.map(|limit| limit.saturating_sub(self.balance))
    }
}

/// The operation a transaction records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TxOp {
    /// Account creation with its starting balance (and limit for quotas).
    Open,
    /// Unconditional creation of currency / quota.
    Credit,
    /// Spend; never drives a balance below zero.
    Debit,
    /// Return of a prior reservation; never lifts a quota above its limit.
    Refund,
    /// Quota replenishment for a reset boundary.
    Reset { boundary: u64 },
}

/// One append-only ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Global, strictly increasing sequence number.
    pub seq: u64,
    pub principal: PrincipalId,
    pub account: AccountKind,
    #[serde(flatten)]
    pub op: TxOp,
    pub amount: Amount,
    pub reason: String,
    pub tick: u64,
}

impl Transaction {
    /// Signed change in micro-units.
    pub fn delta(&self) -> i128 {
        let magnitude = i128::from(self.amount.micros());
        match self.op {
            TxOp::Debit => -magnitude,
            TxOp::Open | TxOp::Credit | TxOp::Refund | TxOp::Reset { .. } => magnitude,
        }
    }
}

/// Instruction produced by the rights policy and applied by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaReset {
    pub principal: PrincipalId,
    pub kind: QuotaKind,
    pub boundary: u64,
}
