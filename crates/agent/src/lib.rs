pub mod pipeline;
pub mod runtime;

pub use pipeline::{AnalysisReport, AnalysisRequest, PipelineError, ReviewPipeline};
pub use runtime::AgentRuntime;
