use std::sync::Arc;

use relay_core::config::{AgentConfig, DeliveryConfig};
use relay_delivery::ChunkSink;
use tracing::info;

use crate::pipeline::{run_turn, GenerationPolicy, TurnOutcome};
use crate::provider::{ChatRequest, LlmProvider, Message};
use crate::tools::ToolSet;

/// Central agent runtime: holds the LLM provider, the tools offered to the
/// model and the per-turn limits. Shared across channel handlers via `Arc`.
pub struct AgentRuntime {
    provider: Box<dyn LlmProvider>,
    tools: ToolSet,
    agent: AgentConfig,
    delivery: DeliveryConfig,
    policy: GenerationPolicy,
}

impl AgentRuntime {
    pub fn new(
        provider: Box<dyn LlmProvider>,
        tools: ToolSet,
        agent: AgentConfig,
        delivery: DeliveryConfig,
    ) -> Self {
        let policy = GenerationPolicy::from_config(&agent, &delivery);
        info!(
            provider = %provider.name(),
            model = %agent.model,
            tools = ?tools.names(),
            "agent runtime ready"
        );
        Self {
            provider,
            tools,
            agent,
            delivery,
            policy,
        }
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        &*self.provider
    }

    pub fn delivery(&self) -> &DeliveryConfig {
        &self.delivery
    }

    pub fn model(&self) -> &str {
        &self.agent.model
    }

    /// Build a request from conversation `messages`.
    ///
    /// The operator system prompt (if any) comes first, followed by the
    /// channel-generated `context` (current time, channel description, ...).
    pub fn build_request(&self, context: &str, messages: Vec<Message>) -> ChatRequest {
        let system = match self.agent.system_prompt.as_deref() {
            Some(prompt) if !prompt.trim().is_empty() => format!("{}\n\n{}", prompt.trim(), context),
            _ => context.to_string(),
        };
        ChatRequest {
            model: self.agent.model.clone(),
            system,
            messages,
            max_tokens: self.agent.max_tokens,
            tools: self.tools.definitions(),
        }
    }

    /// Generate a reply to `messages` and deliver it through `sink`.
    pub async fn respond(
        &self,
        context: &str,
        messages: Vec<Message>,
        sink: Arc<dyn ChunkSink>,
    ) -> TurnOutcome {
        let request = self.build_request(context, messages);
        run_turn(
            &*self.provider,
            &self.tools,
            request,
            sink,
            &self.policy,
            &self.delivery,
        )
        .await
    }
}
