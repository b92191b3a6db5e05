use agora_types::{AccountKind, Amount, PrincipalId, QuotaKind};
use thiserror::Error;

/// Errors from ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unknown principal: {0}")]
    UnknownPrincipal(PrincipalId),

    #[error("unknown quota kind `{kind}` for principal {principal}")]
    UnknownQuotaKind {
        principal: PrincipalId,
        kind: QuotaKind,
    },

    #[error("insufficient {account} balance for {principal}: requested {requested}, available {available}")]
    InsufficientBalance {
        principal: PrincipalId,
        account: AccountKind,
        requested: Amount,
        available: Amount,
    },

    #[error("principal already exists: {0}")]
    DuplicatePrincipal(PrincipalId),

    #[error("invalid {account} operation: {reason}")]
    InvalidOperation { account: AccountKind, reason: String },

    /// Cached balances disagree with the transaction log. Fatal.
    #[error("ledger inconsistency for {principal}: {detail}")]
    Inconsistent {
        principal: PrincipalId,
        detail: String,
    },
}

impl LedgerError {
    /// Whether this error signals corrupted accounting state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::Inconsistent { .. })
    }

    /// Configuration / programmer errors that must not be retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LedgerError::UnknownPrincipal(_)
                | LedgerError::UnknownQuotaKind { .. }
                | LedgerError::DuplicatePrincipal(_)
        )
    }
}
