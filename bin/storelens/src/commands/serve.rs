//! HTTP entrypoint: a single JSON-in/JSON-out invocation route.
//!
//! Failures are reported in-band as `{"error": ..., "timestamp": ...}` with
//! HTTP 200; callers are automation that inspects the body, not the status
//! line. The LLM provider is built once at startup, and a misconfigured
//! provider aborts startup instead of producing a half-alive service.

use axum::{extract::State, routing::get, routing::post, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use storelens_agent::{AnalysisRequest, ReviewPipeline};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use storelens_agent::pipeline::GOOGLE_PLAY;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<ReviewPipeline>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct InvocationPayload {
    prompt: String,
    app_name: String,
    store: Option<String>,
    country: Option<String>,
    rank: Option<i64>,
}

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let (config, paths, provider) = super::bootstrap()?;

    let pipeline = Arc::new(ReviewPipeline::new(
        provider,
        super::play_client(&config),
        paths.output_dir(),
    ));

    let state = AppState { pipeline };

    let app = Router::new()
        .route("/invocations", post(handle_invocation))
        .route("/ping", get(handle_ping))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let host = host.unwrap_or(config.gateway.host);
    let port = port.unwrap_or(config.gateway.port);
    let bind_addr = format!("{}:{}", host, port);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Entrypoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

async fn handle_ping() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn handle_invocation(
    State(state): State<AppState>,
    Json(payload): Json<InvocationPayload>,
) -> Json<Value> {
    let timestamp = Utc::now().to_rfc3339();

    let app_name = if !payload.app_name.is_empty() {
        payload.app_name.clone()
    } else {
        match extract_app_name(&payload.prompt) {
            Some(name) => name,
            None => {
                // No remote calls are made for an unusable request.
                return Json(json!({
                    "error": "app_name is required (set it directly or mention the app in the prompt)",
                    "timestamp": timestamp,
                }));
            }
        }
    };

    let request = AnalysisRequest {
        app_name: app_name.clone(),
        store: payload.store.unwrap_or_else(|| GOOGLE_PLAY.to_string()),
        country: payload.country.unwrap_or_else(|| "us".to_string()),
        rank: payload.rank.unwrap_or(-1),
    };

    info!(app_name = %request.app_name, store = %request.store, country = %request.country, rank = request.rank, "Invocation received");

    match state.pipeline.run(&request).await {
        Ok(report) => Json(json!({
            "result": report.analysis,
            "app_id": report.app_id,
            "app_name": request.app_name,
            "store": request.store,
            "country": request.country,
            "timestamp": timestamp,
        })),
        Err(e) => {
            error!(error = %e, app_name = %request.app_name, "Invocation failed");
            Json(json!({
                "error": e.to_string(),
                "timestamp": timestamp,
            }))
        }
    }
}

/// Best-effort app name extraction from a free-form prompt: the quoted or
/// capitalized phrase following "app" wording. Callers should pass
/// `app_name` explicitly; this only rescues prompts like
/// `analyze reviews for the app "Pokémon UNITE"`.
fn extract_app_name(prompt: &str) -> Option<String> {
    if prompt.is_empty() {
        return None;
    }

    // Quoted name anywhere in the prompt wins.
    for quote in ['"', '\u{201C}', '\u{2018}'] {
        let close = match quote {
            '\u{201C}' => '\u{201D}',
            '\u{2018}' => '\u{2019}',
            q => q,
        };
        if let Some(start) = prompt.find(quote) {
            let rest = &prompt[start + quote.len_utf8()..];
            if let Some(end) = rest.find(close) {
                let name = rest[..end].trim();
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
        }
    }

    // Otherwise take the words after "app"/"application", stopping at
    // punctuation or a lowercase connective.
    let lower = prompt.to_lowercase();
    let keyword_pos = lower
        .find(" app ")
        .map(|i| i + " app ".len())
        .or_else(|| lower.find(" application ").map(|i| i + " application ".len()))?;
    // Lowercasing can shift byte offsets for some scripts; bail out rather
    // than slice mid-character.
    if !prompt.is_char_boundary(keyword_pos) {
        return None;
    }

    let tail = &prompt[keyword_pos..];
    let mut words = Vec::new();
    for word in tail.split_whitespace() {
        let trimmed = word.trim_matches(|c: char| ",.?!;:".contains(c));
        if trimmed.is_empty() {
            break;
        }
        let starts_upper = trimmed
            .chars()
            .next()
            .map(|c| c.is_uppercase() || c.is_numeric())
            .unwrap_or(false);
        if !starts_upper {
            break;
        }
        words.push(trimmed.to_string());
        if word.ends_with(|c: char| ",.?!;:".contains(c)) {
            break;
        }
    }

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}
