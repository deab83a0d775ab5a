//! Download and delivery orchestration.
//!
//! A [`Dispatcher`] turns chat text into a [`Job`]; the [`DeliveryEngine`] probes it,
//! expands collections, and drives each [`Item`] through the [`Stage`] machine while
//! [`ProgressReporter`] loops keep the user's status message alive.

pub mod attribution;
pub mod dispatcher;
pub mod error;
pub mod expander;
pub mod job;
pub mod limiter;
pub mod manager;
pub mod messages;
mod pipeline;
pub mod registry;
pub mod reporter;
mod request;
pub mod stage;
pub mod traits;
pub mod worker_pool;

pub use attribution::dedupe_attribution;
pub use dispatcher::Dispatcher;
pub use error::PipelineError;
pub use expander::{ItemSequence, expand};
pub use job::{
    Item, ItemOutcome, ItemReport, Job, JobHandle, JobOutcome, JobSummary, MediaRequest,
    RequestKind,
};
pub use limiter::{ConcurrencyLimiter, FetchPermit};
pub use manager::{DeliveryEngine, EngineCollaborators, EngineConfig, EngineEvent};
pub use pipeline::PipelineDeps;
pub use registry::JobRegistry;
pub use reporter::{ProgressReporter, ReporterConfig, ReporterExit, ReporterHandle, StatusTemplate};
pub use stage::Stage;
pub use traits::{
    Activity, CachedDelivery, DeliverySurface, MediaSource, Metadata, OwnerId, StatusContext,
    StatusError, StatusSurface, TagSet, TaggedArtifact, Tagger, Upload, UsageStats,
};
pub use worker_pool::{OffloadError, WorkerPool, WorkerPoolConfig};
