use std::collections::BTreeMap;

use agora_types::{Amount, PrincipalId, QuotaKind, QuotaReset};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// When a quota kind replenishes back to its limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Allotment is spent once and never renewed.
    Never,
    /// Renewed at the start of every tick.
    EveryTick,
    /// Renewed every `n` ticks (at ticks that are multiples of `n`).
    EveryNTicks(u64),
}

impl ResetPolicy {
    /// Boundary index for `tick`, if the policy renews at this tick.
    pub fn boundary(self, tick: u64) -> Option<u64> {
        match self {
            ResetPolicy::Never => None,
            ResetPolicy::EveryTick => Some(tick),
            ResetPolicy::EveryNTicks(0) => None,
            ResetPolicy::EveryNTicks(n) if tick % n == 0 => Some(tick / n),
            ResetPolicy::EveryNTicks(_) => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RightsError {
    #[error("reset policy for `{0}` renews every 0 ticks")]
    ZeroResetPeriod(QuotaKind),

    #[error("reset policy configured for unknown quota kind `{0}`")]
    PolicyForUnknownKind(QuotaKind),
}

/// Quota allotments and reset policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RightsConfig {
    #[serde(default = "default_compute_quota")]
    pub default_compute_quota: Amount,

    #[serde(default = "default_disk_quota")]
    pub default_disk_quota: Amount,

    /// Additional quota kinds beyond compute and disk.
    #[serde(default)]
    pub extra_quotas: BTreeMap<QuotaKind, Amount>,

    /// Overrides of the per-kind reset policy.
    #[serde(default)]
    pub reset_policies: BTreeMap<QuotaKind, ResetPolicy>,
}

fn default_compute_quota() -> Amount {
    Amount::whole(1000)
}

fn default_disk_quota() -> Amount {
    Amount::whole(10_000)
}

impl Default for RightsConfig {
    fn default() -> Self {
        Self {
            default_compute_quota: default_compute_quota(),
            default_disk_quota: default_disk_quota(),
            extra_quotas: BTreeMap::new(),
            reset_policies: BTreeMap::new(),
        }
    }
}

/// Interprets a [`RightsConfig`].
#[derive(Clone, Debug)]
pub struct RightsPolicy {
    config: RightsConfig,
}

impl RightsPolicy {
    pub fn new(config: RightsConfig) -> Result<Self, RightsError> {
        let policy = Self { config };
        let kinds = policy.default_quotas();
        for (kind, reset) in &policy.config.reset_policies {
            if !kinds.contains_key(kind) {
                return Err(RightsError::PolicyForUnknownKind(kind.clone()));
            }
            if *reset == ResetPolicy::EveryNTicks(0) {
                return Err(RightsError::ZeroResetPeriod(kind.clone()));
            }
        }
        Ok(policy)
    }

    pub fn config(&self) -> &RightsConfig {
        &self.config
    }

    /// Quota limits every principal is opened with.
    pub fn default_quotas(&self) -> BTreeMap<QuotaKind, Amount> {
        let mut quotas = self.config.extra_quotas.clone();
        quotas.insert(QuotaKind::compute(), self.config.default_compute_quota);
        quotas.insert(QuotaKind::disk(), self.config.default_disk_quota);
        quotas
    }

    /// Reset policy in force for `kind`.
    ///
    /// Compute renews every tick and disk never, unless overridden. Extra
    /// kinds without an override never renew.
    pub fn reset_policy(&self, kind: &QuotaKind) -> ResetPolicy {
        if let Some(policy) = self.config.reset_policies.get(kind) {
            return *policy;
        }
        if kind.as_str() == QuotaKind::COMPUTE {
            ResetPolicy::EveryTick
        } else {
            ResetPolicy::Never
        }
    }

    /// Reset instruction for one principal and kind at `tick`, if due.
    pub fn reset(&self, principal: &PrincipalId, kind: &QuotaKind, tick: u64) -> Option<QuotaReset> {
        self.reset_policy(kind)
            .boundary(tick)
            .map(|boundary| QuotaReset {
                principal: principal.clone(),
                kind: kind.clone(),
                boundary,
            })
    }

    /// Every reset instruction due at `tick`, in principal then kind order.
    pub fn resets_due<'a>(
        &self,
        principals: impl IntoIterator<Item = &'a PrincipalId>,
        tick: u64,
    ) -> Vec<QuotaReset> {
        let kinds: Vec<QuotaKind> = self.default_quotas().into_keys().collect();
        let resets: Vec<QuotaReset> = principals
            .into_iter()
            .flat_map(|principal| {
                kinds
                    .iter()
                    .filter_map(move |kind| self.reset(principal, kind, tick))
            })
            .collect();
        if !resets.is_empty() {
            debug!(tick, count = resets.len(), "Quota resets due");
        }
        resets
    }
}

impl Default for RightsPolicy {
    fn default() -> Self {
        Self {
            config: RightsConfig::default(),
        }
    }
}
