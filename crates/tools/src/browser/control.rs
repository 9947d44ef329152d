//! Control-plane client for the remote browser service.
//!
//! The control plane provisions headless browser instances per region and
//! hands back a WebSocket endpoint plus credentials. Instances are billable
//! while held, so release must work from every path; `stop_session` treats
//! "already gone" as success to keep teardown idempotent.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use storelens_core::{Error, Result};
use tracing::{debug, info};

/// Everything needed to attach an automation client to a live session.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub ws_url: String,
    /// Headers the WebSocket handshake must carry (authorization, session id).
    pub headers: HashMap<String, String>,
}

/// A provisioned remote browser instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    pub session_id: String,
    pub web_socket_url: String,
    pub auth_token: String,
}

impl SessionGrant {
    pub fn connection_info(&self) -> ConnectionInfo {
        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.auth_token),
        );
        headers.insert("X-Session-Id".to_string(), self.session_id.clone());
        ConnectionInfo {
            ws_url: self.web_socket_url.clone(),
            headers,
        }
    }
}

/// Provision and release remote browser sessions. The HTTP implementation
/// is [`HttpControlPlane`]; tests swap in fakes to drive lifecycle paths.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn start_session(&self, region: &str) -> Result<SessionGrant>;
    async fn stop_session(&self, session_id: &str) -> Result<()>;
}

pub struct HttpControlPlane {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpControlPlane {
    pub fn new(endpoint: &str, api_key: &str, start_timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(start_timeout_secs))
            .build()
            .map_err(|e| Error::Connection(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(cfg: &storelens_core::config::BrowserConfig) -> Result<Self> {
        Self::new(
            &cfg.control_endpoint(),
            &cfg.api_key_or_env(),
            cfg.start_timeout_secs,
        )
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn start_session(&self, region: &str) -> Result<SessionGrant> {
        let url = format!("{}/v1/sessions", self.endpoint);
        debug!(region, url = %url, "Requesting browser session");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "region": region }))
            .send()
            .await
            .map_err(|e| {
                Error::ServiceUnavailable(format!("Browser control plane unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ServiceUnavailable(format!(
                "Browser session start failed ({}): {}",
                status, body
            )));
        }

        let grant: SessionGrant = response.json().await.map_err(|e| {
            Error::ServiceUnavailable(format!("Malformed session grant: {}", e))
        })?;

        info!(region, session_id = %grant.session_id, "Browser session started");
        Ok(grant)
    }

    async fn stop_session(&self, session_id: &str) -> Result<()> {
        let url = format!("{}/v1/sessions/{}", self.endpoint, session_id);

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| {
                Error::ServiceUnavailable(format!("Browser control plane unreachable: {}", e))
            })?;

        let status = response.status();
        // 404 means the instance is already released, which is the outcome
        // we wanted.
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            info!(session_id, "Browser session stopped");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::ServiceUnavailable(format!(
            "Browser session stop failed ({}): {}",
            status, body
        )))
    }
}
