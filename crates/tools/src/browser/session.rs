//! Remote browser session lifecycle.
//!
//! One session holds one billable remote browser instance from `start` until
//! `stop`. The state machine is strict: operations that need a live instance
//! fail with `InvalidState` instead of silently reconnecting, and `stop` is
//! idempotent so every failure path can call it unconditionally.

use base64::Engine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storelens_core::{Error, Result};
use tracing::{info, warn};

use super::cdp::CdpClient;
use super::control::{ConnectionInfo, ControlPlane, SessionGrant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No remote instance held.
    Unstarted,
    /// Instance provisioned; not yet attached over CDP.
    Started,
    /// CDP connected and attached to a page target.
    Attached,
    /// Instance released. Terminal.
    Closed,
}

struct Attachment {
    cdp: CdpClient,
    /// CDP session id of the attached page target.
    cdp_session_id: String,
}

pub struct RemoteBrowserSession {
    region: String,
    control: Arc<dyn ControlPlane>,
    state: SessionState,
    grant: Option<SessionGrant>,
    attachment: Option<Attachment>,
    command_timeout_secs: u64,
    navigation_timeout: Duration,
}

impl RemoteBrowserSession {
    pub fn new(region: &str, control: Arc<dyn ControlPlane>) -> Self {
        Self {
            region: region.to_string(),
            control,
            state: SessionState::Unstarted,
            grant: None,
            attachment: None,
            command_timeout_secs: 30,
            navigation_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(
        cfg: &storelens_core::config::BrowserConfig,
        control: Arc<dyn ControlPlane>,
    ) -> Self {
        let mut session = Self::new(&cfg.region, control);
        session.command_timeout_secs = cfg.command_timeout_secs;
        session.navigation_timeout = Duration::from_secs(cfg.navigation_timeout_secs);
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.grant.as_ref().map(|g| g.session_id.as_str())
    }

    /// Provision a remote browser instance. Valid only from `Unstarted`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Unstarted {
            return Err(Error::InvalidState(format!(
                "start() called in state {:?}",
                self.state
            )));
        }
        let grant = self.control.start_session(&self.region).await?;
        info!(region = %self.region, session_id = %grant.session_id, "Session started");
        self.grant = Some(grant);
        self.state = SessionState::Started;
        Ok(())
    }

    /// WebSocket endpoint and auth headers for the held instance. Requires a
    /// live session.
    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        match self.state {
            SessionState::Started | SessionState::Attached => {
                let grant = self.grant.as_ref().ok_or_else(|| {
                    Error::InvalidState("Session grant missing".to_string())
                })?;
                Ok(grant.connection_info())
            }
            other => Err(Error::InvalidState(format!(
                "connection_info() called in state {:?}",
                other
            ))),
        }
    }

    /// Attach over CDP: connect the authenticated WebSocket, reuse the
    /// instance's existing page target if it has one, otherwise create one.
    pub async fn attach(&mut self) -> Result<()> {
        if self.state != SessionState::Started {
            return Err(Error::InvalidState(format!(
                "attach() called in state {:?}",
                self.state
            )));
        }
        let info = self.connection_info()?;
        let cdp = CdpClient::connect(&info, self.command_timeout_secs).await?;

        let target_id = match cdp.first_page_target().await? {
            Some(id) => id,
            None => cdp.create_target("about:blank").await?,
        };
        let cdp_session_id = cdp.attach_to_target(&target_id).await?;
        cdp.enable_page_events(&cdp_session_id).await?;

        info!(
            session_id = self.session_id().unwrap_or(""),
            target_id = %target_id,
            "Attached to page target"
        );
        self.attachment = Some(Attachment {
            cdp,
            cdp_session_id,
        });
        self.state = SessionState::Attached;
        Ok(())
    }

    /// Navigate the attached page and write a PNG screenshot to `path`.
    /// The write is atomic so a failure never leaves a truncated file.
    pub async fn capture(&mut self, url: &str, path: &Path) -> Result<PathBuf> {
        if self.state != SessionState::Attached {
            return Err(Error::InvalidState(format!(
                "capture() called in state {:?}",
                self.state
            )));
        }
        let attachment = self.attachment.as_ref().ok_or_else(|| {
            Error::InvalidState("CDP attachment missing".to_string())
        })?;

        attachment
            .cdp
            .navigate_and_wait(&attachment.cdp_session_id, url, self.navigation_timeout)
            .await?;

        let b64 = attachment.cdp.screenshot(&attachment.cdp_session_id).await?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&b64)
            .map_err(|e| Error::Connection(format!("Invalid screenshot payload: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("png.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;

        info!(url, path = %path.display(), bytes = bytes.len(), "Page captured");
        Ok(path.to_path_buf())
    }

    /// Release the remote instance. Idempotent: calling on a closed or
    /// unstarted session is a no-op, and the session is marked `Closed` even
    /// if the control plane call fails so it is never retried on a dead
    /// grant.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == SessionState::Closed || self.state == SessionState::Unstarted {
            self.state = SessionState::Closed;
            return Ok(());
        }
        // Tear down the CDP connection before releasing the instance.
        self.attachment = None;

        let result = match self.grant.as_ref() {
            Some(grant) => self.control.stop_session(&grant.session_id).await,
            None => Ok(()),
        };
        self.state = SessionState::Closed;
        result
    }

    /// Full scoped lifecycle: start, attach, capture, and always release.
    /// The instance is stopped on every path, including attach and capture
    /// failures.
    pub async fn capture_scoped(&mut self, url: &str, path: &Path) -> Result<PathBuf> {
        self.start().await?;

        let captured = async {
            self.attach().await?;
            self.capture(url, path).await
        }
        .await;

        let stop_result = self.stop().await;
        let captured = captured?;
        stop_result?;
        Ok(captured)
    }
}

impl Drop for RemoteBrowserSession {
    fn drop(&mut self) {
        if self.state == SessionState::Started || self.state == SessionState::Attached {
            warn!(
                session_id = self.session_id().unwrap_or(""),
                "Session dropped without stop(); remote instance may leak until the service reaps it"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Control plane fake that counts lifecycle calls and optionally fails
    /// them.
    struct FakeControlPlane {
        starts: AtomicU32,
        stops: AtomicU32,
        fail_start: bool,
        fail_stop: bool,
        ws_url: String,
    }

    impl FakeControlPlane {
        fn new() -> Self {
            // Nothing listens on this port, so CDP connect fails fast.
            Self::with_ws_url("ws://127.0.0.1:1/devtools/browser/x")
        }

        fn with_ws_url(ws_url: &str) -> Self {
            Self {
                starts: AtomicU32::new(0),
                stops: AtomicU32::new(0),
                fail_start: false,
                fail_stop: false,
                ws_url: ws_url.to_string(),
            }
        }
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        async fn start_session(&self, _region: &str) -> Result<SessionGrant> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(Error::ServiceUnavailable("no capacity".to_string()));
            }
            Ok(SessionGrant {
                session_id: "sess-test".to_string(),
                web_socket_url: self.ws_url.clone(),
                auth_token: "tok".to_string(),
            })
        }

        async fn stop_session(&self, _session_id: &str) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                return Err(Error::ServiceUnavailable("control plane down".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connection_info_before_start_is_invalid() {
        let session = RemoteBrowserSession::new("us-west-2", Arc::new(FakeControlPlane::new()));
        let err = session.connection_info().unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_start_then_connection_info() {
        let mut session =
            RemoteBrowserSession::new("us-west-2", Arc::new(FakeControlPlane::new()));
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Started);

        let info = session.connection_info().unwrap();
        assert_eq!(info.ws_url, "ws://127.0.0.1:1/devtools/browser/x");
        assert_eq!(info.headers.get("Authorization").unwrap(), "Bearer tok");
    }

    #[tokio::test]
    async fn test_double_start_is_invalid() {
        let mut session =
            RemoteBrowserSession::new("us-west-2", Arc::new(FakeControlPlane::new()));
        session.start().await.unwrap();
        let err = session.start().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let control = Arc::new(FakeControlPlane::new());
        let mut session = RemoteBrowserSession::new("us-west-2", control.clone());

        session.start().await.unwrap();
        session.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        // Second stop must not hit the control plane again.
        session.stop().await.unwrap();
        assert_eq!(control.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let control = Arc::new(FakeControlPlane::new());
        let mut session = RemoteBrowserSession::new("us-west-2", control.clone());
        session.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(control.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connection_info_after_stop_is_invalid() {
        let mut session =
            RemoteBrowserSession::new("us-west-2", Arc::new(FakeControlPlane::new()));
        session.start().await.unwrap();
        session.stop().await.unwrap();
        let err = session.connection_info().unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_capture_scoped_releases_on_attach_failure() {
        let control = Arc::new(FakeControlPlane::new());
        let mut session = RemoteBrowserSession::new("us-west-2", control.clone());

        // The grant points at a dead port, so attach fails after start.
        let result = session
            .capture_scoped("https://example.com", Path::new("/tmp/never-written.png"))
            .await;
        assert!(result.is_err());

        // The instance must still have been released, exactly once.
        assert_eq!(control.starts.load(Ordering::SeqCst), 1);
        assert_eq!(control.stops.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_capture_scoped_start_failure_does_not_stop() {
        let control = Arc::new(FakeControlPlane {
            fail_start: true,
            ..FakeControlPlane::new()
        });
        let mut session = RemoteBrowserSession::new("us-west-2", control.clone());

        let err = session
            .capture_scoped("https://example.com", Path::new("/tmp/never-written.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
        // Nothing was provisioned, so nothing to release.
        assert_eq!(control.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_failure_still_closes() {
        let control = Arc::new(FakeControlPlane {
            fail_stop: true,
            ..FakeControlPlane::new()
        });
        let mut session = RemoteBrowserSession::new("us-west-2", control.clone());
        session.start().await.unwrap();

        assert!(session.stop().await.is_err());
        // The session is closed regardless, so a dead grant is never retried.
        assert_eq!(session.state(), SessionState::Closed);
        session.stop().await.unwrap();
        assert_eq!(control.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_scoped_writes_nonempty_file() {
        let ws_url = crate::browser::testutil::start_mock_cdp(false).await;
        let control = Arc::new(FakeControlPlane::with_ws_url(&ws_url));
        let mut session = RemoteBrowserSession::new("us-west-2", control.clone());

        let dir = std::env::temp_dir().join(format!("storelens-capture-{}", uuid::Uuid::new_v4()));
        let path = dir.join("page.png");

        let saved = session
            .capture_scoped("https://example.com", &path)
            .await
            .unwrap();
        let bytes = std::fs::read(&saved).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(bytes, crate::browser::testutil::MOCK_SCREENSHOT_BYTES);
        // No temp file left behind after the rename.
        assert!(!path.with_extension("png.tmp").exists());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(control.stops.load(Ordering::SeqCst), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_navigation_failure_leaves_no_file() {
        let ws_url = crate::browser::testutil::start_mock_cdp(true).await;
        let control = Arc::new(FakeControlPlane::with_ws_url(&ws_url));
        let mut session = RemoteBrowserSession::new("us-west-2", control.clone());

        let dir = std::env::temp_dir().join(format!("storelens-capture-{}", uuid::Uuid::new_v4()));
        let path = dir.join("page.png");

        let err = session
            .capture_scoped("https://bad.invalid", &path)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Navigation(_)));
        // Neither the target file nor a partial temp file exists.
        assert!(!path.exists());
        assert!(!path.with_extension("png.tmp").exists());
        // The instance was still released exactly once.
        assert_eq!(control.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_requires_attached() {
        let mut session =
            RemoteBrowserSession::new("us-west-2", Arc::new(FakeControlPlane::new()));
        session.start().await.unwrap();
        let err = session
            .capture("https://example.com", Path::new("/tmp/nope.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
