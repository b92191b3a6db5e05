//! # agora-cost
//!
//! Maps a capability's measured [`Usage`] to a price in scrip. Pure and
//! deterministic: the same usage and rates always produce the same
//! [`Amount`].
//!
//! Pricing is per started block of 1000 units, so 500 input units cost one
//! full block.

#![deny(unsafe_code)]

use agora_types::{Amount, Usage};
use serde::{Deserialize, Serialize};

/// Units per pricing block.
pub const UNITS_PER_BLOCK: u64 = 1000;

/// Per-1000-unit prices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRates {
    #[serde(default)]
    pub per_1k_input: Amount,
    #[serde(default)]
    pub per_1k_output: Amount,
}

impl CostRates {
    pub const fn new(per_1k_input: Amount, per_1k_output: Amount) -> Self {
        Self {
            per_1k_input,
            per_1k_output,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CostModel {
    rates: CostRates,
}

impl CostModel {
    pub const fn new(rates: CostRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> CostRates {
        self.rates
    }

    /// `ceil(input / 1000) * rate_in + ceil(output / 1000) * rate_out`.
    pub fn compute_cost(&self, usage: &Usage) -> Amount {
        let input = self.rates.per_1k_input.saturating_mul(blocks(usage.input_units));
        let output = self
            .rates
            .per_1k_output
            .saturating_mul(blocks(usage.output_units));
        input.saturating_add(output)
    }

    /// Conservative price for a declared upper bound on usage.
    pub fn estimate(&self, ceiling: &Usage) -> Amount {
        self.compute_cost(ceiling)
    }
}

fn blocks(units: u64) -> u64 {
    units.div_ceil(UNITS_PER_BLOCK)
}
