pub mod analyze;
pub mod ask;
pub mod capture;
pub mod serve;

use std::sync::Arc;
use storelens_core::{Config, Paths};
use storelens_providers::Provider;
use storelens_tools::play::PlayStoreClient;
use storelens_tools::ToolContext;

/// Shared startup wiring: config, directories, and a validated provider.
/// A provider failure here aborts the command instead of deferring the
/// error to the first request.
pub(crate) fn bootstrap() -> anyhow::Result<(Config, Paths, Arc<dyn Provider>)> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;
    let provider = storelens_providers::create_provider(&config)?;
    Ok((config, paths, provider))
}

pub(crate) fn tool_context(config: &Config, paths: &Paths) -> ToolContext {
    ToolContext {
        output_dir: paths.output_dir(),
        config: config.clone(),
    }
}

pub(crate) fn play_client(config: &Config) -> Arc<PlayStoreClient> {
    Arc::new(PlayStoreClient::from_config(&config.play_store))
}
