//! # agora-ratelimit
//!
//! Per-principal, per-capability invocation throttling.
//!
//! Each `(principal, capability)` pair owns a token bucket refilled at one
//! token per configured delay, holding at most `burst` tokens. With the
//! default `burst = 1` this is a plain minimum delay between calls. A zero
//! delay, or `enabled = false`, lets every call through.
//!
//! Check-and-consume is serialized per key; distinct keys never contend on
//! the same bucket.

#![deny(unsafe_code)]

pub mod clock;
pub mod limiter;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{RateLimitConfig, RateLimiter};
