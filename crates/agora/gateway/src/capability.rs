//! Capabilities: the external functions agents pay to invoke.

use std::collections::BTreeMap;
use std::time::Duration;

use agora_types::{Amount, PrincipalId, QuotaKind, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a capability is priced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Pricing {
    /// Never charged in scrip.
    Free,
    /// Priced on usage; the cost of `ceiling` is reserved up front and the
    /// difference to the true cost is reconciled afterwards.
    Reserved { ceiling: Usage },
    /// Free to attempt; only the true cost is charged, after the call.
    PostHoc,
}

/// Static description of a capability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub pricing: Pricing,
    /// Quota consumed by each successful invocation, reserved up front.
    #[serde(default)]
    pub quota_charges: BTreeMap<QuotaKind, Amount>,
    /// Overrides the gateway default.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl CapabilitySpec {
    pub fn free(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pricing: Pricing::Free,
            quota_charges: BTreeMap::new(),
            timeout_ms: None,
        }
    }

    pub fn reserved(name: impl Into<String>, ceiling: Usage) -> Self {
        Self {
            pricing: Pricing::Reserved { ceiling },
            ..Self::free(name)
        }
    }

    pub fn post_hoc(name: impl Into<String>) -> Self {
        Self {
            pricing: Pricing::PostHoc,
            ..Self::free(name)
        }
    }

    pub fn with_quota_charge(mut self, kind: QuotaKind, amount: Amount) -> Self {
        self.quota_charges.insert(kind, amount);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

/// Input handed to a capability.
#[derive(Clone, Debug)]
pub struct CapabilityRequest {
    pub invocation_id: Uuid,
    pub principal: PrincipalId,
    pub capability: String,
    pub args: Value,
    pub tick: u64,
}

/// What a capability returns on success.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutput {
    pub content: Value,
    /// Measured consumption, priced by the cost model.
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityFailure {
    #[error("capability execution failed: {0}")]
    ExecutionFailed(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

/// An invocable external function.
///
/// Implementations must be safe to call concurrently; the gateway never
/// holds a ledger lock while one runs.
#[async_trait]
pub trait Capability: Send + Sync {
    fn spec(&self) -> CapabilitySpec;

    async fn invoke(&self, request: &CapabilityRequest)
        -> Result<CapabilityOutput, CapabilityFailure>;
}

/// Echo capability (free, reports no usage).
#[derive(Debug, Default)]
pub struct EchoCapability;

#[async_trait]
impl Capability for EchoCapability {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::free("echo")
    }

    async fn invoke(
        &self,
        request: &CapabilityRequest,
    ) -> Result<CapabilityOutput, CapabilityFailure> {
        let message = request
            .args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)");

        Ok(CapabilityOutput {
            content: serde_json::json!({
                "message": message,
                "principal": request.principal.to_string(),
                "tick": request.tick,
            }),
            usage: Usage::default(),
        })
    }
}
