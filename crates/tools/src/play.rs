//! Google Play Store client: app-id resolution, review fetching, and local
//! review persistence.
//!
//! Results are typed so "zero reviews" and "no matching app" stay distinct
//! from transport failures; only the LLM-facing tool wrappers degrade to
//! sentinels.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use storelens_core::{Error, Result};
use tracing::{debug, info, warn};

const SEARCH_URL: &str = "https://play.google.com/store/search";
const BATCHEXECUTE_URL: &str = "https://play.google.com/_/PlayStoreUi/data/batchexecute";
/// RPC id of the reviews endpoint inside batchexecute.
const REVIEWS_RPC_ID: &str = "UsvDTd";
/// Sort order 2 = newest first.
const SORT_NEWEST: u32 = 2;
const HTTP_TIMEOUT_SECS: u64 = 30;

static APP_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/store/apps/details\?id=([A-Za-z0-9._]+)").unwrap());

/// One scraped review. `at` round-trips through JSON as an ISO-8601 string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Review {
    pub review_id: String,
    pub username: String,
    pub content: String,
    pub score: u8,
    pub at: DateTime<Utc>,
}

/// Map the entrypoint `rank` field to a score filter: 1..=5 filters to that
/// exact star rating, anything else (including the default -1) means no
/// filter.
pub fn score_filter(rank: i64) -> Option<u8> {
    if (1..=5).contains(&rank) {
        Some(rank as u8)
    } else {
        None
    }
}

/// Seam for the review pipeline; the production implementation is
/// [`PlayStoreClient`].
#[async_trait]
pub trait ReviewSource: Send + Sync {
    /// Resolve an app name to a Play Store app id. `Ok(None)` means the
    /// search returned no app, which is not an error.
    async fn search_app(&self, app_name: &str) -> Result<Option<String>>;

    /// Fetch the newest reviews for an app, optionally filtered to an exact
    /// star rating.
    async fn fetch_reviews(
        &self,
        app_id: &str,
        country: &str,
        filter: Option<u8>,
    ) -> Result<Vec<Review>>;
}

pub struct PlayStoreClient {
    client: Client,
    lang: String,
    review_count: u32,
}

impl PlayStoreClient {
    pub fn new(lang: &str, review_count: u32) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            lang: lang.to_string(),
            review_count,
        }
    }

    pub fn from_config(cfg: &storelens_core::config::PlayStoreConfig) -> Self {
        Self::new(&cfg.lang, cfg.review_count)
    }

    /// Inner payload of the reviews RPC. The envelope carries this as an
    /// embedded JSON string.
    fn reviews_rpc_payload(app_id: &str, count: u32, filter: Option<u8>) -> String {
        let score: Value = match filter {
            Some(s) => json!([s]),
            None => json!([Value::Null]),
        };
        let inner = json!([
            Value::Null,
            Value::Null,
            [SORT_NEWEST, 2, [count, Value::Null, Value::Null], Value::Null, score],
            [app_id, 7]
        ]);
        let envelope = json!([[[REVIEWS_RPC_ID, inner.to_string(), Value::Null, "generic"]]]);
        format!("f.req={}", urlencoding::encode(&envelope.to_string()))
    }
}

#[async_trait]
impl ReviewSource for PlayStoreClient {
    async fn search_app(&self, app_name: &str) -> Result<Option<String>> {
        let url = format!(
            "{}?q={}&c=apps&hl={}",
            SEARCH_URL,
            urlencoding::encode(app_name),
            self.lang
        );
        debug!(app_name, "Searching Play Store");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("Play Store search failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Connection(format!(
                "Play Store search returned {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Connection(format!("Play Store search body: {}", e)))?;

        let app_id = first_app_id(&body);
        match &app_id {
            Some(id) => info!(app_name, app_id = %id, "Resolved app id"),
            None => info!(app_name, "No app found in search results"),
        }
        Ok(app_id)
    }

    async fn fetch_reviews(
        &self,
        app_id: &str,
        country: &str,
        filter: Option<u8>,
    ) -> Result<Vec<Review>> {
        let country = if country.is_empty() { "us" } else { country };
        let url = format!(
            "{}?hl={}&gl={}",
            BATCHEXECUTE_URL, self.lang, country
        );
        let body = Self::reviews_rpc_payload(app_id, self.review_count, filter);

        debug!(app_id, country, ?filter, "Fetching Play Store reviews");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-www-form-urlencoded;charset=UTF-8")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("Play Store reviews request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Connection(format!(
                "Play Store reviews returned {}",
                status
            )));
        }

        let raw = response
            .text()
            .await
            .map_err(|e| Error::Connection(format!("Play Store reviews body: {}", e)))?;

        let mut reviews = parse_reviews_body(&raw)?;
        // The RPC filter is applied server-side; enforce it locally as well
        // so the rank contract holds even if the upstream shape drifts.
        if let Some(score) = filter {
            reviews.retain(|r| r.score == score);
        }

        info!(app_id, count = reviews.len(), "Fetched reviews");
        Ok(reviews)
    }
}

/// First app id in a Play Store search results page, if any.
fn first_app_id(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"a[href*="/store/apps/details?id="]"#).ok()?;
    for anchor in document.select(&selector) {
        if let Some(href) = anchor.value().attr("href") {
            if let Some(caps) = APP_ID_RE.captures(href) {
                return Some(caps[1].to_string());
            }
        }
    }
    None
}

/// Parse a batchexecute response body into reviews.
///
/// The body starts with an anti-JSON prefix line (`)]}'`), then a JSON
/// array whose `[0][2]` element is itself a JSON string holding the review
/// rows. Malformed rows are skipped rather than failing the whole batch.
fn parse_reviews_body(raw: &str) -> Result<Vec<Review>> {
    let json_start = raw
        .find('\n')
        .map(|i| &raw[i..])
        .unwrap_or(raw);

    let outer: Value = serde_json::from_str(json_start.trim())
        .map_err(|e| Error::Connection(format!("Unexpected reviews response shape: {}", e)))?;

    let payload_str = outer
        .get(0)
        .and_then(|v| v.get(2))
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Connection("Reviews response missing payload".to_string()))?;

    let payload: Value = serde_json::from_str(payload_str)
        .map_err(|e| Error::Connection(format!("Unexpected reviews payload shape: {}", e)))?;

    let rows = match payload.get(0).and_then(|v| v.as_array()) {
        Some(rows) => rows,
        // No rows element at all means the app has no reviews
        None => return Ok(Vec::new()),
    };

    let mut reviews = Vec::with_capacity(rows.len());
    for row in rows {
        match parse_review_row(row) {
            Some(review) => reviews.push(review),
            None => warn!("Skipping malformed review row"),
        }
    }
    Ok(reviews)
}

fn parse_review_row(row: &Value) -> Option<Review> {
    let review_id = row.get(0)?.as_str()?.to_string();
    let username = row.get(1)?.get(0)?.as_str()?.to_string();
    let score = row.get(2)?.as_u64()? as u8;
    let content = row
        .get(4)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let at_secs = row.get(5)?.get(0)?.as_i64()?;
    let at = Utc.timestamp_opt(at_secs, 0).single()?;
    Some(Review {
        review_id,
        username,
        content,
        score,
        at,
    })
}

/// Persist reviews as pretty-printed UTF-8 JSON at `<output_dir>/<app_id>.json`.
pub fn save_reviews(output_dir: &Path, app_id: &str, reviews: &[Review]) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{}.json", app_id));
    let content = serde_json::to_string_pretty(reviews)?;
    std::fs::write(&path, content)?;
    info!(app_id, path = %path.display(), count = reviews.len(), "Reviews saved");
    Ok(path)
}

pub fn load_reviews(path: &Path) -> Result<Vec<Review>> {
    let content = std::fs::read_to_string(path)?;
    let reviews = serde_json::from_str(&content)?;
    Ok(reviews)
}
