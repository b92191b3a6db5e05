//! Deterministic stand-in for an LLM provider.
//!
//! The provider integration itself lives outside the kernel; this capability
//! gives agents something priced to call. Usage is derived from the prompt
//! (one input unit per four bytes) and the requested output length, both
//! capped at the configured ceiling, so identical calls cost the same.

use agora_gateway::{Capability, CapabilityFailure, CapabilityOutput, CapabilityRequest, CapabilitySpec};
use agora_types::{Amount, QuotaKind, Usage};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Registered under this name.
pub const LLM_CAPABILITY: &str = "llm";

#[derive(Debug, Clone)]
pub struct SimulatedLlm {
    model: String,
    ceiling: Usage,
}

impl SimulatedLlm {
    pub fn new(model: impl Into<String>, ceiling: Usage) -> Self {
        Self {
            model: model.into(),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> Usage {
        self.ceiling
    }

    fn usage_for(&self, prompt: &str, args: &Value) -> Result<Usage, CapabilityFailure> {
        let usage = match args.get("usage") {
            // Callers that already know their token counts report them.
            Some(reported) => serde_json::from_value::<Usage>(reported.clone())
                .map_err(|e| CapabilityFailure::InvalidArguments(format!("usage: {}", e)))?,
            None => {
                let input = (prompt.len().div_ceil(4) as u64).max(1);
                let output = args
                    .get("max_output_units")
                    .and_then(Value::as_u64)
                    .unwrap_or(self.ceiling.output_units);
                Usage::new(input, output)
            }
        };
        Ok(Usage::new(
            usage.input_units.min(self.ceiling.input_units),
            usage.output_units.min(self.ceiling.output_units),
        ))
    }
}

#[async_trait]
impl Capability for SimulatedLlm {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::reserved(LLM_CAPABILITY, self.ceiling)
            .with_quota_charge(QuotaKind::compute(), Amount::whole(1))
    }

    async fn invoke(
        &self,
        request: &CapabilityRequest,
    ) -> Result<CapabilityOutput, CapabilityFailure> {
        let prompt = request
            .args
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityFailure::InvalidArguments("missing prompt".into()))?;
        let model = request
            .args
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model);
        let usage = self.usage_for(prompt, &request.args)?;

        let digest = blake3::hash(prompt.as_bytes()).to_hex();
        Ok(CapabilityOutput {
            content: json!({
                "model": model,
                "text": format!("simulated response {}", &digest.as_str()[..16]),
            }),
            usage,
        })
    }
}
