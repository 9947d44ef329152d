use std::sync::Arc;
use storelens_core::{Config, Error, Result};

use crate::{AnthropicProvider, OpenAIProvider, Provider};

/// Infer the provider name from the model string prefix.
/// Returns None when the prefix is not recognized.
pub fn infer_provider_from_model(model: &str) -> Option<&'static str> {
    if model.starts_with("anthropic/") || model.starts_with("claude-") {
        Some("anthropic")
    } else if model.starts_with("openai/")
        || model.starts_with("gpt-")
        || model.starts_with("o1")
        || model.starts_with("o3")
    {
        Some("openai")
    } else {
        None
    }
}

/// Pick the first provider with a configured API key when neither an
/// explicit provider nor the model prefix settles it.
fn fallback_provider_name(config: &Config) -> Option<&'static str> {
    if !config.anthropic_api_key().is_empty() {
        return Some("anthropic");
    }
    if !config.openai_api_key().is_empty() {
        return Some("openai");
    }
    None
}

/// Build the LLM provider for the configured model. This runs once at
/// startup: a failure here means the process refuses to serve requests
/// instead of carrying a nullable provider around.
pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let model = &config.agent.model;
    let max_tokens = config.agent.max_tokens;
    let temperature = config.agent.temperature;

    let effective: &str = if let Some(explicit) = config.agent.provider.as_deref() {
        match explicit {
            "anthropic" => "anthropic",
            "openai" => "openai",
            other => {
                return Err(Error::Config(format!(
                    "Unknown provider '{}' in agent.provider (expected 'anthropic' or 'openai')",
                    other
                )))
            }
        }
    } else if let Some(inferred) = infer_provider_from_model(model) {
        inferred
    } else if let Some(fallback) = fallback_provider_name(config) {
        fallback
    } else {
        return Err(Error::Config(
            "No LLM provider configured. Use a recognized model prefix (e.g. \
             'anthropic/claude-...', 'gpt-4o') or add an API key to the providers section."
                .to_string(),
        ));
    };

    match effective {
        "anthropic" => {
            let api_key = config.anthropic_api_key();
            if api_key.is_empty() {
                return Err(Error::Config(
                    "Anthropic provider selected but no API key configured (providers.anthropic.apiKey or ANTHROPIC_API_KEY)".to_string(),
                ));
            }
            Ok(Arc::new(AnthropicProvider::new(
                &api_key,
                config.providers.anthropic.api_base.as_deref(),
                model,
                max_tokens,
                temperature,
            )))
        }
        _ => {
            let api_key = config.openai_api_key();
            if api_key.is_empty() {
                return Err(Error::Config(
                    "OpenAI provider selected but no API key configured (providers.openai.apiKey or OPENAI_API_KEY)".to_string(),
                ));
            }
            Ok(Arc::new(OpenAIProvider::new(
                &api_key,
                config.providers.openai.api_base.as_deref(),
                model,
                max_tokens,
                temperature,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_provider_from_model() {
        assert_eq!(infer_provider_from_model("anthropic/claude-sonnet-4"), Some("anthropic"));
        assert_eq!(infer_provider_from_model("claude-3-5-sonnet"), Some("anthropic"));
        assert_eq!(infer_provider_from_model("gpt-4o"), Some("openai"));
        assert_eq!(infer_provider_from_model("openai/gpt-4o-mini"), Some("openai"));
        assert_eq!(infer_provider_from_model("some-unknown-model"), None);
    }

    #[test]
    fn test_create_provider_with_key() {
        let mut config = Config::default();
        config.providers.anthropic.api_key = "sk-ant-test".to_string();
        let result = create_provider(&config);
        assert!(result.is_ok());
    }

    #[test]
    fn test_create_provider_missing_key_fails() {
        let mut config = Config::default();
        // anthropic model prefix but no key anywhere
        config.agent.model = "claude-3-5-sonnet".to_string();
        std::env::remove_var("ANTHROPIC_API_KEY");
        let result = create_provider(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_create_provider_unknown_explicit_fails() {
        let mut config = Config::default();
        config.agent.provider = Some("mistral".to_string());
        let result = create_provider(&config);
        assert!(result.is_err());
    }
}
