use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use storelens_core::{Error, Result};
use tracing::{debug, warn};

use crate::{Tool, ToolContext};

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        debug!(name = schema.name, "Registering tool");
        self.tools.insert(schema.name.to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Tool schemas in the OpenAI function-calling format all providers
    /// accept (Anthropic converts on the way out).
    pub fn get_tool_schemas(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                let schema = tool.schema();
                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": schema.parameters
                    }
                })
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, ctx: ToolContext, params: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::Tool(format!("Unknown tool: {}", name)))?;

        if let Err(e) = tool.validate(&params) {
            warn!(tool = name, error = %e, "Tool validation failed");
            return Err(e);
        }

        debug!(tool = name, "Executing tool");
        tool.execute(ctx, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolSchema;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo",
                description: "Echo the input back",
                parameters: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            }
        }

        fn validate(&self, params: &Value) -> Result<()> {
            crate::require_str(params, "text")?;
            Ok(())
        }

        async fn execute(&self, _ctx: ToolContext, params: Value) -> Result<Value> {
            Ok(json!({"echo": params["text"]}))
        }
    }

    fn test_ctx() -> ToolContext {
        ToolContext {
            output_dir: std::env::temp_dir(),
            config: storelens_core::Config::default(),
        }
    }

    #[test]
    fn test_registry_empty() {
        let reg = ToolRegistry::new();
        assert!(reg.tool_names().is_empty());
        assert!(reg.get("echo").is_none());
    }

    #[test]
    fn test_registry_schemas() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let schemas = reg.get_tool_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[0]["function"]["name"], "echo");
    }

    #[tokio::test]
    async fn test_registry_execute() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));

        let out = reg
            .execute("echo", test_ctx(), json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out["echo"], "hi");
    }

    #[tokio::test]
    async fn test_registry_execute_unknown_tool() {
        let reg = ToolRegistry::new();
        let err = reg.execute("nope", test_ctx(), json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }

    #[tokio::test]
    async fn test_registry_execute_validation_failure() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let err = reg.execute("echo", test_ctx(), json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
