//! Token-bucket limiter keyed by `(principal, capability)`.

use std::collections::BTreeMap;
use std::sync::Arc;

use agora_types::PrincipalId;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, SystemClock};

// ── Config ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Minimum spacing between calls, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,

    /// Calls that may be made back to back before spacing applies.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Per-capability delay overrides, in milliseconds.
    #[serde(default)]
    pub capability_delays_ms: BTreeMap<String, u64>,
}

fn default_enabled() -> bool {
    true
}

fn default_burst() -> u32 {
    1
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            delay_ms: 0,
            burst: default_burst(),
            capability_delays_ms: BTreeMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_delay(delay: std::time::Duration) -> Self {
        Self {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }
}

// ── Limiter ─────────────────────────────────────────────────────────────

type Key = (PrincipalId, String);

/// Rate limiter for capability invocations.
///
/// Buckets are tracked as a theoretical arrival time: the instant at which
/// the bucket would be full again. A call is admitted when that instant is
/// at most `(burst - 1) * delay` in the future, and pushes it `delay` further.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    buckets: DashMap<Key, DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Spacing in force for `capability`; zero means unlimited.
    pub fn delay_for(&self, capability: &str) -> Duration {
        if !self.config.enabled {
            return Duration::zero();
        }
        let ms = self
            .config
            .capability_delays_ms
            .get(capability)
            .copied()
            .unwrap_or(self.config.delay_ms);
        i64::try_from(ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .unwrap_or(Duration::MAX)
    }

    /// Check and consume one token. Returns `false` when throttled.
    pub fn allow(&self, principal: &PrincipalId, capability: &str) -> bool {
        self.acquire(principal, capability).is_ok()
    }

    /// Check and consume one token, reporting how long to wait on denial.
    pub fn acquire(
        &self,
        principal: &PrincipalId,
        capability: &str,
    ) -> Result<(), std::time::Duration> {
        let delay = self.delay_for(capability);
        if delay <= Duration::zero() {
            return Ok(());
        }
        let now = self.clock.now();
        let tolerance = self.tolerance(delay);

        let mut tat = self
            .buckets
            .entry((principal.clone(), capability.to_string()))
            .or_insert(now);
        let earliest = tat
            .checked_sub_signed(tolerance)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if now < earliest {
            let wait = (earliest - now).to_std().unwrap_or(std::time::Duration::MAX);
            debug!(
                principal = %principal,
                capability,
                retry_after_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "Rate limited"
            );
            return Err(wait);
        }
        // A delay past the end of the calendar can never be honoured.
        let Some(next) = (*tat).max(now).checked_add_signed(delay) else {
            let wait = delay.to_std().unwrap_or(std::time::Duration::MAX);
            debug!(
                principal = %principal,
                capability,
                delay_ms = delay.num_milliseconds(),
                "Rate limit delay out of range; denying"
            );
            return Err(wait);
        };
        *tat = next;
        Ok(())
    }

    /// Earliest instant the next call for this key would be admitted.
    pub fn next_allowed_at(&self, principal: &PrincipalId, capability: &str) -> DateTime<Utc> {
        let now = self.clock.now();
        let delay = self.delay_for(capability);
        if delay <= Duration::zero() {
            return now;
        }
        let key = (principal.clone(), capability.to_string());
        match self.buckets.get(&key) {
            Some(tat) => tat
                .checked_sub_signed(self.tolerance(delay))
                .map_or(now, |earliest| earliest.max(now)),
            None => now,
        }
    }

    /// Time until the next call would be admitted; zero if it would be now.
    pub fn retry_after(&self, principal: &PrincipalId, capability: &str) -> std::time::Duration {
        let now = self.clock.now();
        let at = self.next_allowed_at(principal, capability);
        if at <= now {
            return std::time::Duration::ZERO;
        }
        at.signed_duration_since(now)
            .to_std()
            .unwrap_or(std::time::Duration::MAX)
    }

    /// Forget all bucket state, e.g. when resuming a run.
    pub fn clear(&self) {
        self.buckets.clear();
    }

    /// `(burst - 1) * delay`, saturating at the largest representable span.
    fn tolerance(&self, delay: Duration) -> Duration {
        i32::try_from(self.config.burst.max(1) - 1)
            .ok()
            .and_then(|extra| delay.checked_mul(extra))
            .unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(config: RateLimitConfig) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::with_clock(config, clock.clone());
        (limiter, clock)
    }

    fn p(id: &str) -> PrincipalId {
        PrincipalId::new(id)
    }

    #[test]
    fn disabled_always_allows() {
        let mut config = RateLimitConfig::disabled();
        config.delay_ms = 60_000;
        let (limiter, _) = limiter(config);
        for _ in 0..100 {
            assert!(limiter.allow(&p("a"), "llm"));
        }
        assert_eq!(limiter.retry_after(&p("a"), "llm"), std::time::Duration::ZERO);
    }

    #[test]
    fn zero_delay_is_unlimited() {
        let (limiter, _) = limiter(RateLimitConfig::default());
        assert!((0..50).all(|_| limiter.allow(&p("a"), "llm")));
    }

    #[test]
    fn fixed_delay_between_calls() {
        let (limiter, clock) =
            limiter(RateLimitConfig::with_delay(std::time::Duration::from_secs(1)));
        assert!(limiter.allow(&p("a"), "llm"));
        assert!(!limiter.allow(&p("a"), "llm"));
        assert_eq!(
            limiter.retry_after(&p("a"), "llm"),
            std::time::Duration::from_secs(1)
        );

        clock.advance(Duration::milliseconds(400));
        assert_eq!(
            limiter.acquire(&p("a"), "llm"),
            Err(std::time::Duration::from_millis(600))
        );

        clock.advance(Duration::milliseconds(600));
        assert!(limiter.allow(&p("a"), "llm"));
    }

    #[test]
    fn keys_are_independent() {
        let (limiter, _) =
            limiter(RateLimitConfig::with_delay(std::time::Duration::from_secs(5)));
        assert!(limiter.allow(&p("a"), "llm"));
        assert!(limiter.allow(&p("b"), "llm"));
        assert!(limiter.allow(&p("a"), "search"));
        assert!(!limiter.allow(&p("a"), "llm"));
    }

    #[test]
    fn burst_admits_back_to_back_calls() {
        let mut config = RateLimitConfig::with_delay(std::time::Duration::from_secs(1));
        config.burst = 3;
        let (limiter, clock) = limiter(config);
        assert!(limiter.allow(&p("a"), "llm"));
        assert!(limiter.allow(&p("a"), "llm"));
        assert!(limiter.allow(&p("a"), "llm"));
        assert!(!limiter.allow(&p("a"), "llm"));

        clock.advance(Duration::seconds(1));
        assert!(limiter.allow(&p("a"), "llm"));
        assert!(!limiter.allow(&p("a"), "llm"));
    }

    #[test]
    fn capability_override() {
        let mut config = RateLimitConfig::with_delay(std::time::Duration::from_secs(10));
        config.capability_delays_ms.insert("free_echo".into(), 0);
        let (limiter, _) = limiter(config);
        assert!(limiter.allow(&p("a"), "free_echo"));
        assert!(limiter.allow(&p("a"), "free_echo"));
        assert_eq!(limiter.delay_for("llm"), Duration::seconds(10));
    }

    #[test]
    fn unrepresentable_delay_denies_instead_of_panicking() {
        let mut config = RateLimitConfig::default();
        config.delay_ms = u64::MAX;
        let (limiter, _) = limiter(config);

        let wait = limiter.acquire(&p("a"), "llm").unwrap_err();
        assert!(wait > std::time::Duration::from_secs(86_400 * 365));
        assert!(!limiter.allow(&p("a"), "llm"));
        assert!(limiter.next_allowed_at(&p("a"), "llm") >= limiter.clock.now());
    }

    #[test]
    fn oversized_burst_saturates_tolerance() {
        let mut config = RateLimitConfig::with_delay(std::time::Duration::from_secs(1));
        config.burst = u32::MAX;
        let (limiter, clock) = limiter(config);
        for _ in 0..10 {
            assert!(limiter.allow(&p("a"), "llm"));
        }
        clock.advance(Duration::seconds(5));
        assert!(limiter.allow(&p("a"), "llm"));
        assert_eq!(limiter.retry_after(&p("a"), "llm"), std::time::Duration::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_admit_exactly_one() {
        let (limiter, _) =
            limiter(RateLimitConfig::with_delay(std::time::Duration::from_secs(60)));
        let limiter = Arc::new(limiter);
        let mut handles = Vec::new();
        for _ in 0..32 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.allow(&p("a"), "llm") }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
