//! In-process CDP endpoint for lifecycle tests: speaks just enough of the
//! protocol for the attach, navigate, and screenshot flows.

use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

pub(crate) const MOCK_SCREENSHOT_BYTES: &[u8] = b"png-bytes";

/// Spawn a single-connection CDP server and return its websocket URL.
/// With `fail_navigation` every `Page.navigate` answers with an
/// `errorText` instead of firing the load event.
pub(crate) async fn start_mock_cdp(fail_navigation: bool) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(serve_one(listener, fail_navigation));
    format!("ws://127.0.0.1:{}/devtools/browser/mock", port)
}

async fn serve_one(listener: tokio::net::TcpListener, fail_navigation: bool) {
    let (stream, _) = match listener.accept().await {
        Ok(conn) => conn,
        Err(_) => return,
    };
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut sink, mut reader) = ws.split();

    while let Some(Ok(Message::Text(text))) = reader.next().await {
        let msg: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let id = match msg.get("id").and_then(|v| v.as_u64()) {
            Some(id) => id,
            None => continue,
        };
        let method = msg.get("method").and_then(|v| v.as_str()).unwrap_or("");

        let result = match method {
            "Target.getTargets" => json!({
                "targetInfos": [{"targetId": "t1", "type": "page", "url": "about:blank"}]
            }),
            "Target.attachToTarget" => json!({"sessionId": "cdp-sess-1"}),
            "Page.navigate" if fail_navigation => {
                json!({"errorText": "net::ERR_NAME_NOT_RESOLVED"})
            }
            "Page.navigate" => json!({"frameId": "f1"}),
            "Page.captureScreenshot" => json!({
                "data": base64::engine::general_purpose::STANDARD.encode(MOCK_SCREENSHOT_BYTES)
            }),
            _ => json!({}),
        };

        let reply = json!({"id": id, "result": result});
        if sink.send(Message::Text(reply.to_string())).await.is_err() {
            return;
        }

        if method == "Page.navigate" && !fail_navigation {
            let event = json!({
                "method": "Page.loadEventFired",
                "params": {"timestamp": 1.0},
                "sessionId": "cdp-sess-1"
            });
            if sink.send(Message::Text(event.to_string())).await.is_err() {
                return;
            }
        }
    }
}
