//! `storelens ask` - free-form instruction through the agent tool loop.

use std::sync::Arc;
use storelens_agent::AgentRuntime;
use storelens_tools::browser::CapturePageTool;
use storelens_tools::play_tools::{GetAppIdTool, GetAppReviewsTool};
use storelens_tools::ToolRegistry;

pub async fn run(prompt: &str) -> anyhow::Result<()> {
    let (config, paths, provider) = super::bootstrap()?;
    let ctx = super::tool_context(&config, &paths);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(GetAppIdTool::from_context(&ctx)));
    registry.register(Arc::new(GetAppReviewsTool::from_context(&ctx)));
    registry.register(Arc::new(CapturePageTool::from_context(&ctx)?));

    let runtime = AgentRuntime::new(provider, registry, ctx, config);
    let answer = runtime.handle(prompt).await?;

    println!("{}", answer);
    Ok(())
}
