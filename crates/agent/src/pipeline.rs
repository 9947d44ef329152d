//! Structured review-analysis pipeline.
//!
//! The entrypoint's well-known request shape does not need a free-form tool
//! loop, so this runs the fixed stages directly: resolve the app id, fetch
//! reviews, summarize, translate. Each stage failure names the stage, and
//! "no reviews" is a normal result rather than an error.

use std::path::PathBuf;
use std::sync::Arc;
use storelens_core::ChatMessage;
use storelens_providers::Provider;
use storelens_tools::play::{save_reviews, score_filter, Review, ReviewSource};
use thiserror::Error;
use tracing::{info, warn};

pub const GOOGLE_PLAY: &str = "Google Play";

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub app_name: String,
    pub store: String,
    pub country: String,
    /// Exact star rating filter; 1-5 filters, anything else fetches all.
    pub rank: i64,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub app_id: String,
    pub review_count: usize,
    pub analysis: String,
}

/// Pipeline failures, attributed to the stage that produced them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to resolve app id for '{app_name}': {source}")]
    ResolveApp {
        app_name: String,
        source: storelens_core::Error,
    },
    #[error("No app named '{0}' found on Google Play")]
    AppNotFound(String),
    #[error("Failed to fetch reviews for '{app_id}': {source}")]
    FetchReviews {
        app_id: String,
        source: storelens_core::Error,
    },
    #[error("Review summarization failed: {0}")]
    Summarize(storelens_core::Error),
    #[error("Translation failed: {0}")]
    Translate(storelens_core::Error),
}

pub struct ReviewPipeline {
    provider: Arc<dyn Provider>,
    source: Arc<dyn ReviewSource>,
    output_dir: PathBuf,
}

impl ReviewPipeline {
    pub fn new(
        provider: Arc<dyn Provider>,
        source: Arc<dyn ReviewSource>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            provider,
            source,
            output_dir,
        }
    }

    pub async fn run(
        &self,
        request: &AnalysisRequest,
    ) -> Result<AnalysisReport, PipelineError> {
        let app_id = self.resolve_app_id(request).await?;

        let reviews = self
            .source
            .fetch_reviews(&app_id, &request.country, score_filter(request.rank))
            .await
            .map_err(|source| PipelineError::FetchReviews {
                app_id: app_id.clone(),
                source,
            })?;

        // Keep a local copy of what was analyzed; a write failure is not
        // worth failing the whole analysis over.
        if let Err(e) = save_reviews(&self.output_dir, &app_id, &reviews) {
            warn!(app_id = %app_id, error = %e, "Failed to save reviews");
        }

        if reviews.is_empty() {
            info!(app_id = %app_id, "No reviews matched the request");
            return Ok(AnalysisReport {
                app_id,
                review_count: 0,
                analysis: "No reviews found for the requested app and filter.".to_string(),
            });
        }

        let review_count = reviews.len();
        let summary = self.summarize(&request.app_name, &reviews).await?;
        let translated = self.translate(&summary).await?;

        Ok(AnalysisReport {
            app_id,
            review_count,
            analysis: format!("{}\n\n---\n\n{}", summary, translated),
        })
    }

    async fn resolve_app_id(&self, request: &AnalysisRequest) -> Result<String, PipelineError> {
        // Only Google Play is scraped; other stores pass the name through
        // as an opaque id.
        if request.store != GOOGLE_PLAY {
            return Ok(request.app_name.clone());
        }
        let found = self
            .source
            .search_app(&request.app_name)
            .await
            .map_err(|source| PipelineError::ResolveApp {
                app_name: request.app_name.clone(),
                source,
            })?;
        found.ok_or_else(|| PipelineError::AppNotFound(request.app_name.clone()))
    }

    async fn summarize(
        &self,
        app_name: &str,
        reviews: &[Review],
    ) -> Result<String, PipelineError> {
        let mut listing = String::new();
        for review in reviews {
            listing.push_str(&format!(
                "- [{}★] {} ({}): {}\n",
                review.score,
                review.username,
                review.at.format("%Y-%m-%d"),
                review.content
            ));
        }

        let prompt = format!(
            "Analyze these user reviews of the app '{}'.\n\n\
             Reviews:\n{}\n\
             Produce a markdown report covering:\n\
             1. The most common issues and complaints\n\
             2. The distribution of star ratings as percentages\n\
             3. Overall user sentiment\n\
             Base everything strictly on the reviews above.",
            app_name, listing
        );

        self.ask(&prompt).await.map_err(PipelineError::Summarize)
    }

    async fn translate(&self, summary: &str) -> Result<String, PipelineError> {
        let prompt = format!(
            "Translate the following report into Chinese. Keep the markdown \
             structure intact and do not add commentary.\n\n{}",
            summary
        );
        self.ask(&prompt).await.map_err(PipelineError::Translate)
    }

    async fn ask(&self, prompt: &str) -> storelens_core::Result<String> {
        let messages = vec![ChatMessage::user(prompt)];
        let response = self.provider.chat(&messages, &[]).await?;
        Ok(response.content.unwrap_or_default())
    }
}
