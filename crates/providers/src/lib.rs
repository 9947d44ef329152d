pub mod anthropic;
pub mod factory;
pub mod openai;

use async_trait::async_trait;
use serde_json::Value;
use storelens_core::types::{ChatMessage, LLMResponse};
use storelens_core::Result;

/// A hosted LLM behind a chat-with-tools interface. The rest of the system
/// treats this as an opaque collaborator: no contract on latency or
/// determinism.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse>;
}

pub use anthropic::AnthropicProvider;
pub use factory::{create_provider, infer_provider_from_model};
pub use openai::OpenAIProvider;
