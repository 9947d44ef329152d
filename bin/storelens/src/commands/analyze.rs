//! `storelens analyze` - run the review pipeline once and print the report.

use storelens_agent::{AnalysisRequest, ReviewPipeline};
use storelens_agent::pipeline::GOOGLE_PLAY;
use tracing::info;

pub async fn run(app_name: &str, country: &str, rank: i64) -> anyhow::Result<()> {
    let (config, paths, provider) = super::bootstrap()?;

    let pipeline = ReviewPipeline::new(
        provider,
        super::play_client(&config),
        paths.output_dir(),
    );

    let request = AnalysisRequest {
        app_name: app_name.to_string(),
        store: GOOGLE_PLAY.to_string(),
        country: country.to_string(),
        rank,
    };

    let report = pipeline.run(&request).await?;
    info!(app_id = %report.app_id, review_count = report.review_count, "Analysis complete");

    println!("{}", report.analysis);
    Ok(())
}
