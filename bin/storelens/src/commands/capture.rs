//! `storelens capture` - screenshot a URL via a remote browser session.
//!
//! With `--hold` the session stays attached until Ctrl-C, for poking at the
//! live instance from another client. The instance is released on every
//! exit path, including interrupt.

use std::path::PathBuf;
use std::sync::Arc;
use storelens_core::{Config, Paths};
use storelens_tools::browser::{HttpControlPlane, RemoteBrowserSession};
use tracing::{error, info};

pub async fn run(url: &str, output: Option<&str>, hold: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;

    let path = match output {
        Some(p) => PathBuf::from(p),
        None => paths
            .output_dir()
            .join(format!("capture-{}.png", chrono::Utc::now().format("%Y%m%d-%H%M%S"))),
    };

    let control = Arc::new(HttpControlPlane::from_config(&config.browser)?);
    let mut session = RemoteBrowserSession::from_config(&config.browser, control);

    if !hold {
        let saved = session.capture_scoped(url, &path).await?;
        println!("{}", saved.display());
        return Ok(());
    }

    session.start().await?;
    let result = hold_and_capture(&mut session, url, &path).await;
    // Release the instance no matter how the hold ended.
    if let Err(e) = session.stop().await {
        error!(error = %e, "Failed to release browser session");
    }
    let saved = result?;
    println!("{}", saved.display());
    Ok(())
}

async fn hold_and_capture(
    session: &mut RemoteBrowserSession,
    url: &str,
    path: &std::path::Path,
) -> anyhow::Result<PathBuf> {
    session.attach().await?;
    let saved = session.capture(url, path).await?;

    info!(path = %saved.display(), "Captured; holding session until Ctrl-C");
    if let Some(id) = session.session_id() {
        println!("session {} live, screenshot at {}", id, saved.display());
    }
    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, releasing session");

    Ok(saved)
}
