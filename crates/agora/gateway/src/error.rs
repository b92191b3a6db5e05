use std::time::Duration;

use agora_ledger::LedgerError;
use agora_types::{PrincipalId, QuotaKind, WorldStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification reported to callers alongside every failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownPrincipal,
    UnknownQuotaKind,
    UnknownCapability,
    InactivePrincipal,
    InsufficientBalance,
    InsufficientBudget,
    RateLimited,
    CapabilityError,
    Timeout,
    WorldHalted,
    Fatal,
}

impl ErrorKind {
    /// Transient failures a caller may retry later.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimited)
    }

    /// Configuration or programmer errors.
    pub fn is_configuration(self) -> bool {
        matches!(
            self,
            ErrorKind::UnknownPrincipal | ErrorKind::UnknownQuotaKind | ErrorKind::UnknownCapability
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::UnknownPrincipal => "unknown_principal",
            ErrorKind::UnknownQuotaKind => "unknown_quota_kind",
            ErrorKind::UnknownCapability => "unknown_capability",
            ErrorKind::InactivePrincipal => "inactive_principal",
            ErrorKind::InsufficientBalance => "insufficient_balance",
            ErrorKind::InsufficientBudget => "insufficient_budget",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CapabilityError => "capability_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::WorldHalted => "world_halted",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Gateway errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("unknown principal: {0}")]
    UnknownPrincipal(PrincipalId),

    #[error("unknown quota kind `{kind}` for principal {principal}")]
    UnknownQuotaKind {
        principal: PrincipalId,
        kind: QuotaKind,
    },

    #[error("principal is inactive: {0}")]
    InactivePrincipal(PrincipalId),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("insufficient budget for {principal}: {reason}")]
    InsufficientBudget {
        principal: PrincipalId,
        reason: String,
    },

    #[error("rate limited: {principal} may call `{capability}` again in {}ms", retry_after.as_millis())]
    RateLimited {
        principal: PrincipalId,
        capability: String,
        retry_after: Duration,
    },

    #[error("capability `{capability}` failed: {message}")]
    CapabilityError { capability: String, message: String },

    #[error("capability `{capability}` timed out after {}ms", after.as_millis())]
    Timeout { capability: String, after: Duration },

    #[error("world is not running: {0}")]
    WorldHalted(WorldStatus),

    #[error("fatal accounting error: {0}")]
    Fatal(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::UnknownCapability(_) => ErrorKind::UnknownCapability,
            GatewayError::UnknownPrincipal(_) => ErrorKind::UnknownPrincipal,
            GatewayError::UnknownQuotaKind { .. } => ErrorKind::UnknownQuotaKind,
            GatewayError::InactivePrincipal(_) => ErrorKind::InactivePrincipal,
            GatewayError::InsufficientBalance(_) => ErrorKind::InsufficientBalance,
            GatewayError::InsufficientBudget { .. } => ErrorKind::InsufficientBudget,
            GatewayError::RateLimited { .. } => ErrorKind::RateLimited,
            GatewayError::CapabilityError { .. } => ErrorKind::CapabilityError,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::WorldHalted(_) => ErrorKind::WorldHalted,
            GatewayError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<LedgerError> for GatewayError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownPrincipal(principal) => GatewayError::UnknownPrincipal(principal),
            LedgerError::UnknownQuotaKind { principal, kind } => {
                GatewayError::UnknownQuotaKind { principal, kind }
            }
            e @ LedgerError::InsufficientBalance { .. } => {
                GatewayError::InsufficientBalance(e.to_string())
            }
            other => GatewayError::Fatal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::{AccountKind, Amount};

    #[test]
    fn ledger_errors_map_to_kinds() {
        let unknown: GatewayError = LedgerError::UnknownPrincipal(PrincipalId::new("x")).into();
        assert_eq!(unknown.kind(), ErrorKind::UnknownPrincipal);

        let insufficient: GatewayError = LedgerError::InsufficientBalance {
            principal: PrincipalId::new("x"),
            account: AccountKind::Currency,
            requested: Amount::whole(2),
            available: Amount::whole(1),
        }
        .into();
        assert_eq!(insufficient.kind(), ErrorKind::InsufficientBalance);

        let fatal: GatewayError = LedgerError::Inconsistent {
            principal: PrincipalId::new("x"),
            detail: "mismatch".into(),
        }
        .into();
        assert_eq!(fatal.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let err = GatewayError::RateLimited {
            principal: PrincipalId::new("a"),
            capability: "llm".into(),
            retry_after: Duration::from_millis(1500),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));
        assert!(err.kind().is_retryable());
        assert!(err.to_string().contains("1500ms"));
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::InsufficientBudget).unwrap(),
            "\"insufficient_budget\""
        );
        assert_eq!(ErrorKind::WorldHalted.to_string(), "world_halted");
    }
}
