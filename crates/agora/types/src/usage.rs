use serde::{Deserialize, Serialize};

/// Measured consumption of one capability invocation (e.g. token counts).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Usage {
    pub input_units: u64,
    pub output_units: u64,
}

impl Usage {
    pub const fn new(input_units: u64, output_units: u64) -> Self {
        Self {
            input_units,
            output_units,
        }
    }

    pub const fn total_units(&self) -> u64 {
        self.input_units.saturating_add(self.output_units)
    }
}
