//! Built-in agents for `agora run`.

use agora_types::PrincipalId;
use agora_world::{Agent, TickContext};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::llm::LLM_CAPABILITY;

/// Sends one prompt to the llm capability per tick.
#[derive(Debug, Clone)]
pub struct PromptAgent {
    principal: PrincipalId,
    prompt: String,
}

impl PromptAgent {
    pub fn new(principal: PrincipalId, prompt: impl Into<String>) -> Self {
        Self {
            principal,
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl Agent for PromptAgent {
    fn principal(&self) -> &PrincipalId {
        &self.principal
    }

    async fn act(&self, ctx: &TickContext) -> anyhow::Result<()> {
        let prompt = format!("{} (tick {})", self.prompt, ctx.tick());
        let result = ctx
            .invoke(LLM_CAPABILITY, json!({ "prompt": prompt }))
            .await;
        if result.success {
            let balance = ctx.balance()?;
            debug!(
                principal = %self.principal,
                tick = ctx.tick(),
                cost = %result.cost,
                balance = %balance,
                "Prompt answered"
            );
        } else {
            info!(
                principal = %self.principal,
                tick = ctx.tick(),
                kind = ?result.error_kind,
                error = result.error.as_deref().unwrap_or_default(),
                "Prompt refused"
            );
        }
        Ok(())
    }
}
