pub mod browser;
pub mod play;
pub mod play_tools;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use storelens_core::{Config, Result};

pub use registry::ToolRegistry;

/// Everything a tool execution may need. Cloned per call.
#[derive(Clone)]
pub struct ToolContext {
    /// Directory where scraped review JSON and screenshots are written.
    pub output_dir: PathBuf,
    pub config: Config,
}

pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value>;
}

/// Require a non-empty string parameter; shared by tool validators.
pub(crate) fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| storelens_core::Error::Validation(format!("missing required parameter '{}'", key)))
}
