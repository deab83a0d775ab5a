//! Failure taxonomy of the delivery pipeline.

use thiserror::Error;

/// Why an item or a job did not reach `Done`.
///
/// `CancellationRequested` is a normal terminal outcome rather than a fault; it is
/// carried here so that stage code can bail out with `?`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("collection is empty or could not be read")]
    EmptyCollection,

    #[error("metadata unavailable: {0}")]
    ExtractionFailure(String),

    #[error("fetch failed: {0}")]
    FetchFailure(String),

    #[error("post-processing failed: {0}")]
    ProcessingFailure(String),

    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("cached delivery for {content_id} is no longer valid")]
    StaleCacheEntry { content_id: String },

    #[error("cancelled")]
    CancellationRequested,
}

impl PipelineError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyCollection => "empty_collection",
            Self::ExtractionFailure(_) => "extraction_failure",
            Self::FetchFailure(_) => "fetch_failure",
            Self::ProcessingFailure(_) => "processing_failure",
            Self::DeliveryFailure(_) => "delivery_failure",
            Self::StaleCacheEntry { .. } => "stale_cache_entry",
            Self::CancellationRequested => "cancelled",
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::CancellationRequested)
    }
}
