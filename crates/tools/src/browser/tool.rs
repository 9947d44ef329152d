//! LLM-facing page capture tool. Each call runs one full scoped session
//! lifecycle so no remote instance outlives the call.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use storelens_core::Result;
use tracing::warn;

use super::control::{ControlPlane, HttpControlPlane};
use super::session::RemoteBrowserSession;
use crate::{require_str, Tool, ToolContext, ToolSchema};

pub struct CapturePageTool {
    control: Arc<dyn ControlPlane>,
}

impl CapturePageTool {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self { control }
    }

    pub fn from_context(ctx: &ToolContext) -> Result<Self> {
        let control = HttpControlPlane::from_config(&ctx.config.browser)?;
        Ok(Self::new(Arc::new(control)))
    }
}

#[async_trait]
impl Tool for CapturePageTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "capture_page",
            description: "Open a URL in a remote headless browser and save a PNG screenshot. Returns the saved file path.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "URL to open, e.g. 'https://play.google.com/store/apps/details?id=...'"
                    },
                    "output_path": {
                        "type": "string",
                        "description": "Where to write the PNG; defaults to a generated name in the output directory"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_str(params, "url")?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let url = require_str(&params, "url")?;
        let path = match params.get("output_path").and_then(|v| v.as_str()) {
            Some(p) => PathBuf::from(p),
            None => ctx
                .output_dir
                .join(format!("capture-{}.png", uuid::Uuid::new_v4())),
        };

        let mut session =
            RemoteBrowserSession::from_config(&ctx.config.browser, self.control.clone());
        match session.capture_scoped(url, &path).await {
            Ok(saved) => Ok(json!({ "path": saved.display().to_string() })),
            Err(e) => {
                warn!(url, error = %e, "Page capture failed");
                Ok(json!({
                    "path": Value::Null,
                    "note": format!("Capture failed: {}", e)
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DeadControlPlane;

    #[async_trait]
    impl ControlPlane for DeadControlPlane {
        async fn start_session(&self, _region: &str) -> Result<super::super::SessionGrant> {
            Err(storelens_core::Error::ServiceUnavailable(
                "no capacity".to_string(),
            ))
        }

        async fn stop_session(&self, _session_id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_capture_failure_degrades_to_note() {
        let tool = CapturePageTool::new(Arc::new(DeadControlPlane));
        let ctx = ToolContext {
            output_dir: std::env::temp_dir(),
            config: storelens_core::Config::default(),
        };
        let out = tool
            .execute(ctx, json!({"url": "https://example.com"}))
            .await
            .unwrap();
        assert!(out["path"].is_null());
        assert!(out["note"].as_str().unwrap().contains("no capacity"));
    }

    #[test]
    fn test_validate_requires_url() {
        let tool = CapturePageTool::new(Arc::new(DeadControlPlane));
        assert!(tool.validate(&json!({})).is_err());
        assert!(tool.validate(&json!({"url": "https://example.com"})).is_ok());
    }
}
