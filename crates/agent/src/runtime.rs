//! Agent runtime: drives the LLM tool loop for free-form instructions.
//!
//! The pipeline handles the structured review-analysis path; this runtime
//! exists for open-ended prompts where the model decides which tools to
//! call.

use std::sync::Arc;
use storelens_core::{ChatMessage, Config, Error, Result};
use storelens_providers::Provider;
use storelens_tools::{ToolContext, ToolRegistry};
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a mobile app store analyst. You can look up \
Google Play apps, fetch their user reviews, and capture web pages with a remote \
browser. Use the available tools to gather data before answering, and answer \
with concrete findings from the data.";

pub struct AgentRuntime {
    provider: Arc<dyn Provider>,
    registry: ToolRegistry,
    ctx: ToolContext,
    config: Config,
}

impl AgentRuntime {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: ToolRegistry,
        ctx: ToolContext,
        config: Config,
    ) -> Self {
        Self {
            provider,
            registry,
            ctx,
            config,
        }
    }

    /// Run one instruction through the tool loop and return the model's
    /// final text.
    pub async fn handle(&self, instruction: &str) -> Result<String> {
        let tools = self.registry.get_tool_schemas();
        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(instruction),
        ];

        let max_iterations = self.config.agent.max_tool_iterations;
        for iteration in 0..max_iterations {
            debug!(iteration, "LLM call iteration");

            let response = self.chat_with_retry(&messages, &tools, iteration).await?;

            info!(
                content_len = response.content.as_ref().map(|c| c.len()).unwrap_or(0),
                tool_calls_count = response.tool_calls.len(),
                finish_reason = %response.finish_reason,
                "LLM response received"
            );

            if response.tool_calls.is_empty() {
                return Ok(response.content.unwrap_or_default());
            }

            let mut assistant_msg =
                ChatMessage::assistant(response.content.as_deref().unwrap_or(""));
            assistant_msg.tool_calls = Some(response.tool_calls.clone());
            messages.push(assistant_msg);

            for tool_call in &response.tool_calls {
                let result = match self
                    .registry
                    .execute(&tool_call.name, self.ctx.clone(), tool_call.arguments.clone())
                    .await
                {
                    Ok(value) => value.to_string(),
                    Err(e) => {
                        warn!(tool = %tool_call.name, error = %e, "Tool execution failed");
                        format!("Error: {}", e)
                    }
                };
                let mut tool_msg = ChatMessage::tool_result(&tool_call.id, &result);
                tool_msg.name = Some(tool_call.name.clone());
                messages.push(tool_msg);
            }
        }

        warn!(max_iterations, "Reached max tool iterations");
        Err(Error::Provider(format!(
            "Gave up after {} tool iterations without a final answer",
            max_iterations
        )))
    }

    /// Call the provider with exponential backoff on transient failures.
    async fn chat_with_retry(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
        iteration: u32,
    ) -> Result<storelens_core::LLMResponse> {
        let max_retries = self.config.agent.llm_max_retries;
        let base_delay_ms = self.config.agent.llm_retry_delay_ms;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay_ms = base_delay_ms * (1u64 << (attempt - 1).min(4));
                warn!(attempt, max_retries, delay_ms, iteration, "Retrying LLM call");
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
            match self.provider.chat(messages, tools).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(attempt, iteration, "LLM call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(error = %e, attempt, max_retries, iteration, "LLM call failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Provider("LLM call failed with no error detail".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use storelens_core::{LLMResponse, ToolCallRequest};
    use storelens_tools::{Tool, ToolSchema};

    /// Scripted provider: returns canned responses in order.
    struct ScriptedProvider {
        responses: Mutex<Vec<Result<LLMResponse>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<LLMResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[Value],
        ) -> Result<LLMResponse> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(LLMResponse {
                    content: Some("done".to_string()),
                    tool_calls: vec![],
                    finish_reason: "stop".to_string(),
                });
            }
            responses.remove(0)
        }
    }

    struct AppIdStub;

    #[async_trait]
    impl Tool for AppIdStub {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "get_app_id",
                description: "stub",
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        fn validate(&self, _params: &Value) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, _ctx: ToolContext, _params: Value) -> Result<Value> {
            Ok(json!({"app_id": "com.pokemon.pokemonunite"}))
        }
    }

    fn runtime_with(responses: Vec<Result<LLMResponse>>) -> AgentRuntime {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(AppIdStub));
        let mut config = Config::default();
        config.agent.llm_retry_delay_ms = 1;
        let ctx = ToolContext {
            output_dir: std::env::temp_dir(),
            config: config.clone(),
        };
        AgentRuntime::new(Arc::new(ScriptedProvider::new(responses)), registry, ctx, config)
    }

    fn text_response(text: &str) -> LLMResponse {
        LLMResponse {
            content: Some(text.to_string()),
            tool_calls: vec![],
            finish_reason: "stop".to_string(),
        }
    }

    fn tool_response(name: &str) -> LLMResponse {
        LLMResponse {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: "tc_1".to_string(),
                name: name.to_string(),
                arguments: json!({}),
            }],
            finish_reason: "tool_calls".to_string(),
        }
    }

    #[tokio::test]
    async fn test_plain_answer_no_tools() {
        let runtime = runtime_with(vec![Ok(text_response("Pokémon UNITE is a MOBA."))]);
        let answer = runtime.handle("what is pokemon unite").await.unwrap();
        assert_eq!(answer, "Pokémon UNITE is a MOBA.");
    }

    #[tokio::test]
    async fn test_tool_loop_then_answer() {
        let runtime = runtime_with(vec![
            Ok(tool_response("get_app_id")),
            Ok(text_response("The app id is com.pokemon.pokemonunite.")),
        ]);
        let answer = runtime.handle("find the app id").await.unwrap();
        assert!(answer.contains("com.pokemon.pokemonunite"));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_error() {
        let runtime = runtime_with(vec![
            Err(Error::Provider("rate limited".to_string())),
            Ok(text_response("recovered")),
        ]);
        let answer = runtime.handle("hello").await.unwrap();
        assert_eq!(answer, "recovered");
    }

    #[tokio::test]
    async fn test_retries_exhausted_propagates_error() {
        let responses = (0..4)
            .map(|_| Err(Error::Provider("down".to_string())))
            .collect();
        let runtime = runtime_with(responses);
        let err = runtime.handle("hello").await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }
}
