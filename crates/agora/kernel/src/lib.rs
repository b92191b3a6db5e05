//! # agora-kernel
//!
//! Turns configuration into a running world:
//!
//! - [`config`]: layered [`KernelConfig`] (defaults, file, `AGORA_*` env)
//! - [`kernel`]: the [`Kernel`] bootstrap facade, fresh or resumed from a
//!   checkpoint
//! - [`llm`]: a deterministic [`SimulatedLlm`] capability
//! - [`agents`]: the built-in [`PromptAgent`] driven by `agora run`
//! - [`telemetry`]: tracing subscriber setup for the binary

#![deny(unsafe_code)]

pub mod agents;
pub mod config;
pub mod kernel;
pub mod llm;
pub mod telemetry;

pub use agents::PromptAgent;
pub use config::{ConfigError, KernelConfig, LoggingConfig};
pub use kernel::{Kernel, KernelError};
pub use llm::{SimulatedLlm, LLM_CAPABILITY};
