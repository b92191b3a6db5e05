//! Kernel configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML/YAML/JSON file, then environment variables prefixed `AGORA_` with
//! `__` between path segments (`AGORA_WORLD__MAX_TICKS=50`).
//!
//! Amounts are written as decimals in the file and converted to exact
//! [`Amount`]s once, in the accessor methods.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use agora_cost::CostRates;
use agora_ratelimit::RateLimitConfig;
use agora_rights::RightsConfig;
use agora_types::{Amount, AmountError, PrincipalId};
use agora_world::{ExecutionMode, SchedulerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("principal id must not be empty")]
    EmptyPrincipalId,

    #[error("principal {0} is configured more than once")]
    DuplicatePrincipal(String),

    #[error("invalid value for {field}: {source}")]
    InvalidAmount {
        field: String,
        #[source]
        source: AmountError,
    },

    #[error("{field} = {value} exceeds the maximum of {max}")]
    OutOfRange { field: String, value: f64, max: f64 },
}

/// Longest accepted `llm.rate_limit_delay`, in seconds (one year).
pub const MAX_RATE_LIMIT_DELAY_SECS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Main kernel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub world: WorldSection,

    #[serde(default)]
    pub costs: CostsSection,

    #[serde(default)]
    pub principals: Vec<PrincipalConfig>,

    #[serde(default)]
    pub rights: RightsSection,

    #[serde(default)]
    pub llm: LlmSection,

    #[serde(default)]
    pub budget: BudgetSection,

    #[serde(default)]
    pub rate_limiting: RateLimitingSection,

    #[serde(default)]
    pub execution: ExecutionSection,

    #[serde(default)]
    pub checkpoint: CheckpointSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            world: WorldSection::default(),
            costs: CostsSection::default(),
            principals: Vec::new(),
            rights: RightsSection::default(),
            llm: LlmSection::default(),
            budget: BudgetSection::default(),
            rate_limiting: RateLimitingSection::default(),
            execution: ExecutionSection::default(),
            checkpoint: CheckpointSection::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSection {
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    /// Re-fold every ledger book after each tick.
    #[serde(default)]
    pub verify_ledger_each_tick: bool,
}

impl Default for WorldSection {
    fn default() -> Self {
        Self {
            max_ticks: default_max_ticks(),
            verify_ledger_each_tick: false,
        }
    }
}

/// Scrip per 1000 input / output units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostsSection {
    #[serde(default = "default_per_1k_input")]
    pub per_1k_input_tokens: f64,

    #[serde(default = "default_per_1k_output")]
    pub per_1k_output_tokens: f64,
}

impl Default for CostsSection {
    fn default() -> Self {
        Self {
            per_1k_input_tokens: default_per_1k_input(),
            per_1k_output_tokens: default_per_1k_output(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalConfig {
    pub id: String,

    #[serde(default = "default_starting_scrip")]
    pub starting_scrip: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RightsSection {
    #[serde(default = "default_compute_quota")]
    pub default_compute_quota: f64,

    #[serde(default = "default_disk_quota")]
    pub default_disk_quota: f64,
}

impl Default for RightsSection {
    fn default() -> Self {
        Self {
            default_compute_quota: default_compute_quota(),
            default_disk_quota: default_disk_quota(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Minimum spacing between one principal's calls, in seconds.
    #[serde(default)]
    pub rate_limit_delay: f64,

    /// Upper bound on input units per call; reserved up front.
    #[serde(default = "default_max_input_units")]
    pub max_input_units: u64,

    /// Upper bound on output units per call; reserved up front.
    #[serde(default = "default_max_output_units")]
    pub max_output_units: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            rate_limit_delay: 0.0,
            max_input_units: default_max_input_units(),
            max_output_units: default_max_output_units(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSection {
    /// World-wide API cost ceiling; 0 means unlimited.
    #[serde(default)]
    pub max_api_cost: f64,

    #[serde(default)]
    pub checkpoint_interval: u64,

    #[serde(default = "default_true")]
    pub checkpoint_on_end: bool,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            max_api_cost: 0.0,
            checkpoint_interval: 0,
            checkpoint_on_end: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RateLimitingSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSection {
    /// Run agent turns concurrently within a tick.
    #[serde(default)]
    pub use_autonomous_loops: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSection {
    /// No checkpoints are written without a directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Keep only the newest N checkpoints; 0 keeps all.
    #[serde(default)]
    pub retain: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_max_ticks() -> u64 {
    100
}

fn default_per_1k_input() -> f64 {
    1.0
}

fn default_per_1k_output() -> f64 {
    3.0
}

fn default_starting_scrip() -> f64 {
    100.0
}

fn default_compute_quota() -> f64 {
    1000.0
}

fn default_disk_quota() -> f64 {
    10_000.0
}

fn default_model() -> String {
    "simulated".to_string()
}

fn default_max_input_units() -> u64 {
    4000
}

fn default_max_output_units() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl KernelConfig {
    /// Load and validate configuration. An explicit `path` must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&KernelConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AGORA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: KernelConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document layered over the defaults.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: KernelConfig = config::Config::builder()
            .add_source(config::Config::try_from(&KernelConfig::default())?)
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for principal in &self.principals {
            if principal.id.trim().is_empty() {
                return Err(ConfigError::EmptyPrincipalId);
            }
            if !seen.insert(principal.id.as_str()) {
                return Err(ConfigError::DuplicatePrincipal(principal.id.clone()));
            }
        }
        self.principals()?;
        self.cost_rates()?;
        self.rights_config()?;
        self.budget_limit()?;
        amount("llm.rate_limit_delay", self.llm.rate_limit_delay)?;
        if self.llm.rate_limit_delay > MAX_RATE_LIMIT_DELAY_SECS {
            return Err(ConfigError::OutOfRange {
                field: "llm.rate_limit_delay".to_string(),
                value: self.llm.rate_limit_delay,
                max: MAX_RATE_LIMIT_DELAY_SECS,
            });
        }
        Ok(())
    }

    /// Configured principals with their starting scrip.
    pub fn principals(&self) -> Result<Vec<(PrincipalId, Amount)>, ConfigError> {
        self.principals
            .iter()
            .map(|p| {
                let scrip = amount(&format!("principals.{}.starting_scrip", p.id), p.starting_scrip)?;
                Ok((PrincipalId::new(p.id.clone()), scrip))
            })
            .collect()
    }

    pub fn cost_rates(&self) -> Result<CostRates, ConfigError> {
        Ok(CostRates::new(
            amount("costs.per_1k_input_tokens", self.costs.per_1k_input_tokens)?,
            amount("costs.per_1k_output_tokens", self.costs.per_1k_output_tokens)?,
        ))
    }

    pub fn rights_config(&self) -> Result<RightsConfig, ConfigError> {
        Ok(RightsConfig {
            default_compute_quota: amount(
                "rights.default_compute_quota",
                self.rights.default_compute_quota,
            )?,
            default_disk_quota: amount("rights.default_disk_quota", self.rights.default_disk_quota)?,
            ..RightsConfig::default()
        })
    }

    /// `None` when the budget is unlimited.
    pub fn budget_limit(&self) -> Result<Option<Amount>, ConfigError> {
        let limit = amount("budget.max_api_cost", self.budget.max_api_cost)?;
        Ok((!limit.is_zero()).then_some(limit))
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        let delay_ms = (self
            .llm
            .rate_limit_delay
            .clamp(0.0, MAX_RATE_LIMIT_DELAY_SECS)
            * 1000.0)
            .round() as u64;
        RateLimitConfig {
            enabled: self.rate_limiting.enabled,
            delay_ms,
            ..RateLimitConfig::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_ticks: self.world.max_ticks,
            execution_mode: if self.execution.use_autonomous_loops {
                ExecutionMode::Concurrent
            } else {
                ExecutionMode::Sequential
            },
            checkpoint_interval: self.budget.checkpoint_interval,
            checkpoint_on_end: self.budget.checkpoint_on_end,
            verify_ledger_each_tick: self.world.verify_ledger_each_tick,
        }
    }
}

fn amount(field: &str, value: f64) -> Result<Amount, ConfigError> {
    Amount::from_f64(value).map_err(|source| ConfigError::InvalidAmount {
        field: field.to_string(),
        source,
    })
}
