//! Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! Connects to a remote browser's debugging endpoint, including the
//! authenticated handshake the control plane requires, and multiplexes
//! command responses and events over one socket. Page-level commands are
//! scoped to an attached target via its CDP session id.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storelens_core::{Error, Result};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use super::control::ConnectionInfo;

pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request id.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    next_id: AtomicU64,
    /// Event listeners (domain.event -> channels).
    event_listeners: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>,
    command_timeout: Duration,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a remote CDP endpoint, carrying the control plane's auth
    /// headers on the WebSocket handshake.
    pub async fn connect(info: &ConnectionInfo, command_timeout_secs: u64) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
        use tokio_tungstenite::tungstenite::Message;

        let mut request = info
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Connection(format!("Invalid WebSocket URL: {}", e)))?;

        for (name, value) in &info.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Connection(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Connection(format!("Invalid header value: {}", e)))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _) = connect_async(request).await.map_err(|e| {
            Error::Connection(format!(
                "Failed to connect to CDP endpoint {}: {}",
                info.ws_url, e
            ))
        })?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        let event_listeners: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        // Writer task: owns the sink, forwards messages from the channel.
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: dispatches responses to pending waiters and events to
        // subscribers.
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Ok(val) = serde_json::from_str::<Value>(&text) {
                            if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                                let mut pending = pending_clone.lock().await;
                                if let Some(tx) = pending.remove(&id) {
                                    let _ = tx.send(val);
                                }
                            } else if let Some(method) =
                                val.get("method").and_then(|v| v.as_str())
                            {
                                let mut listeners = events_clone.lock().await;
                                if let Some(senders) = listeners.get_mut(method) {
                                    let params =
                                        val.get("params").cloned().unwrap_or(Value::Null);
                                    // Prune subscribers whose receiver is
                                    // gone so repeated navigations do not
                                    // accumulate dead channels.
                                    senders.retain(|tx| {
                                        match tx.try_send(params.clone()) {
                                            Ok(()) => true,
                                            Err(mpsc::error::TrySendError::Full(_)) => true,
                                            Err(mpsc::error::TrySendError::Closed(_)) => false,
                                        }
                                    });
                                    if senders.is_empty() {
                                        listeners.remove(method);
                                    }
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            command_timeout: Duration::from_secs(command_timeout_secs),
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a browser-level CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.send_inner(method, params, None).await
    }

    /// Send a command scoped to an attached target's CDP session.
    pub async fn send_for_session(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        self.send_inner(method, params, Some(session_id)).await
    }

    async fn send_inner(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(sid) = session_id {
            msg["sessionId"] = json!(sid);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Connection(format!("Failed to send CDP command: {}", e)))?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(cdp_error) = response.get("error") {
                    Err(Error::Connection(format!("CDP error: {}", cdp_error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Connection(
                "CDP response channel closed".to_string(),
            )),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {:?}",
                    method, self.command_timeout
                )))
            }
        }
    }

    /// Subscribe to a CDP event. Returns a receiver that will get event
    /// params. Events from session-scoped targets are dispatched by method
    /// name like browser-level events.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        let mut listeners = self.event_listeners.lock().await;
        listeners
            .entry(method.to_string())
            .or_insert_with(Vec::new)
            .push(tx);
        rx
    }

    // ─── Target management ────────────────────────────────────────────

    /// All browser targets (pages, iframes, workers, etc.).
    pub async fn get_targets(&self) -> Result<Vec<Value>> {
        let result = self.send_command("Target.getTargets", json!({})).await?;
        Ok(result
            .get("targetInfos")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// First existing page target, if the remote browser already has one.
    pub async fn first_page_target(&self) -> Result<Option<String>> {
        let targets = self.get_targets().await?;
        Ok(targets
            .iter()
            .find(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
            .and_then(|t| t.get("targetId").and_then(|v| v.as_str()))
            .map(|s| s.to_string()))
    }

    /// Create a new page target (tab) with the given URL.
    pub async fn create_target(&self, url: &str) -> Result<String> {
        let result = self
            .send_command("Target.createTarget", json!({"url": url}))
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Connection("No targetId returned from createTarget".to_string()))
    }

    /// Attach to a target in flat mode; page-level commands then carry the
    /// returned CDP session id.
    pub async fn attach_to_target(&self, target_id: &str) -> Result<String> {
        let result = self
            .send_command(
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
            )
            .await?;
        result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                Error::Connection("No sessionId returned from attachToTarget".to_string())
            })
    }

    // ─── Page commands (session-scoped) ───────────────────────────────

    pub async fn enable_page_events(&self, session_id: &str) -> Result<()> {
        self.send_for_session(session_id, "Page.enable", json!({}))
            .await?;
        Ok(())
    }

    /// Navigate and wait for the page load event, bounded by
    /// `navigation_timeout`.
    pub async fn navigate_and_wait(
        &self,
        session_id: &str,
        url: &str,
        navigation_timeout: Duration,
    ) -> Result<()> {
        // Subscribe before navigating so the load event cannot be missed.
        let mut loaded = self.subscribe_event("Page.loadEventFired").await;

        let result = self
            .send_for_session(session_id, "Page.navigate", json!({"url": url}))
            .await?;
        if let Some(text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::Navigation(format!(
                "Navigation to {} failed: {}",
                url, text
            )));
        }

        match tokio::time::timeout(navigation_timeout, loaded.recv()).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(Error::Navigation(format!(
                "Connection lost while loading {}",
                url
            ))),
            Err(_) => Err(Error::Navigation(format!(
                "Page load for {} timed out after {:?}",
                url, navigation_timeout
            ))),
        }
    }

    /// Take a screenshot of the attached page; returns base64-encoded PNG.
    pub async fn screenshot(&self, session_id: &str) -> Result<String> {
        let result = self
            .send_for_session(session_id, "Page.captureScreenshot", json!({"format": "png"}))
            .await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Connection("No screenshot data returned".to_string()))
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

#[cfg(test)]
impl CdpClient {
    pub(crate) async fn event_listener_count(&self, method: &str) -> usize {
        self.event_listeners
            .lock()
            .await
            .get(method)
            .map(|senders| senders.len())
            .unwrap_or(0)
    }
}
