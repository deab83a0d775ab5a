//! Delivery engine: runs jobs, owns the shared limiter, worker pool and registry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::expander;
use super::job::{
    Item, ItemOutcome, ItemReport, Job, JobHandle, JobOutcome, JobSummary, RequestKind,
};
use super::limiter::{ConcurrencyLimiter, DEFAULT_MAX_CONCURRENT_FETCHES};
use super::messages;
use super::pipeline::{ItemPipeline, PipelineDeps};
use super::registry::JobRegistry;
use super::reporter::{ProgressReporter, ReporterConfig, ReporterHandle, StatusTemplate};
use super::traits::{Activity, Metadata, OwnerId, StatusContext, StatusSurface};
use super::worker_pool::{DEFAULT_MAX_WORKERS, WorkerPool, WorkerPoolConfig};
use super::{PipelineError, Stage};

/// Configuration for the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum simultaneous fetches across all users.
    pub max_concurrent_fetches: usize,
    /// Maximum concurrently offloaded collaborator calls. Fetches run on the
    /// pool, so this must not be below `max_concurrent_fetches`.
    pub max_workers: usize,
    /// Timeout of a single offloaded call.
    pub task_timeout_secs: u64,
    /// Reporter tick interval.
    pub tick_interval_ms: u64,
    /// Ticks before a slow-variant status switches over.
    pub slow_tick_threshold: u64,
    /// Lifetime of error notices.
    pub notice_ttl_secs: u64,
    /// Lifetime of the "cancelled" notice.
    pub cancel_notice_ttl_secs: u64,
    /// Lifetime of the collection summary.
    pub summary_ttl_secs: u64,
    /// Where artifacts are written while an item is in flight.
    pub download_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            max_workers: DEFAULT_MAX_WORKERS,
            task_timeout_secs: 3600,
            tick_interval_ms: 1000,
            slow_tick_threshold: 15,
            notice_ttl_secs: 10,
            cancel_notice_ttl_secs: 3,
            summary_ttl_secs: 10,
            download_dir: PathBuf::from("downloads"),
        }
    }
}

impl EngineConfig {
    pub fn reporter_config(&self) -> ReporterConfig {
        ReporterConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            slow_threshold: self.slow_tick_threshold,
        }
    }

    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            max_workers: self.max_workers,
            task_timeout_secs: self.task_timeout_secs,
        }
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    JobStarted {
        job_id: String,
        owner_id: OwnerId,
        url: String,
    },
    StageChanged {
        job_id: String,
        item_id: String,
        ordinal_index: usize,
        stage: Stage,
    },
    ItemFinished {
        job_id: String,
        item_id: String,
        content_id: Option<String>,
        outcome: ItemOutcome,
    },
    JobFinished {
        job_id: String,
        owner_id: OwnerId,
        outcome: JobOutcome,
    },
}

/// External collaborators of the engine.
#[derive(Clone)]
pub struct EngineCollaborators {
    pub pipeline: PipelineDeps,
    pub status: Arc<dyn StatusSurface>,
}

/// The delivery engine service.
pub struct DeliveryEngine {
    config: EngineConfig,
    status: Arc<dyn StatusSurface>,
    pipeline: ItemPipeline,
    limiter: ConcurrencyLimiter,
    workers: Arc<WorkerPool>,
    registry: Arc<JobRegistry>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl DeliveryEngine {
    pub fn new(config: EngineConfig, collaborators: EngineCollaborators) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let limiter = ConcurrencyLimiter::new(config.max_concurrent_fetches);
        let workers = Arc::new(WorkerPool::with_config(config.worker_pool_config()));
        let registry = Arc::new(JobRegistry::new());
        let reporter = ProgressReporter::new(collaborators.status.clone(), config.reporter_config());

        let pipeline = ItemPipeline::new(
            collaborators.pipeline,
            limiter.clone(),
            workers.clone(),
            registry.clone(),
            reporter,
            config.download_dir.clone(),
            event_tx.clone(),
        );

        Self {
            config,
            status: collaborators.status,
            pipeline,
            limiter,
            workers,
            registry,
            event_tx,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn status_surface(&self) -> &Arc<dyn StatusSurface> {
        &self.status
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Start a registered job whose status message is `status`.
    pub fn launch(self: &Arc<Self>, job: Arc<Job>, status: StatusContext) -> JobHandle {
        let mut template = StatusTemplate::new(
            job.request.url.clone(),
            messages::PREPARING,
            Activity::Preparing,
        );
        if job.request.kind == RequestKind::Collection {
            template = template.with_slow_label(messages::SLOW_COLLECTION);
        }
        let preparing = self.pipeline.start_reporter(&job, &status, template);

        let engine = self.clone();
        let task_job = job.clone();
        let join = tokio::spawn(async move { engine.run_job(&task_job, status, preparing).await });
        JobHandle::new(job, join)
    }

    /// Cancel every job and stop the worker pool.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.registry.cancel_everything();
        self.workers.stop();
        info!(cancelled, "Delivery engine stopped");
        cancelled
    }

    async fn run_job(
        &self,
        job: &Job,
        status: StatusContext,
        preparing: ReporterHandle,
    ) -> JobSummary {
        let mut summary = JobSummary::new(job);
        info!(job_id = %job.id, owner_id = job.owner_id, url = %job.request.url, "Job started");
        let _ = self.event_tx.send(EngineEvent::JobStarted {
            job_id: job.id.clone(),
            owner_id: job.owner_id,
            url: job.request.url.clone(),
        });

        let probed = if job.is_cancelled() {
            Err(PipelineError::CancellationRequested)
        } else {
            self.pipeline.probe(&job.scope, &job.request.url).await
        };
        self.pipeline.stop_reporter(job, preparing).await;

        match probed {
            Ok(metadata) if metadata.is_collection => {
                summary.kind = RequestKind::Collection;
                self.run_collection(job, status, metadata, &mut summary)
                    .await;
            }
            Ok(metadata) => {
                summary.kind = RequestKind::Single;
                self.run_single(job, status, metadata, &mut summary).await;
            }
            Err(PipelineError::CancellationRequested) => {
                summary.cancelled = true;
                self.close(&status).await;
                self.notice(job.owner_id, messages::CANCELLED, self.cancel_notice_ttl())
                    .await;
            }
            Err(e) => {
                warn!(job_id = %job.id, "Could not resolve request: {}", e);
                self.close(&status).await;
                let text = match &e {
                    PipelineError::ExtractionFailure(_) => messages::NO_SUCH_MEDIA.to_string(),
                    other => messages::request_failed(&other.to_string()),
                };
                self.notice(job.owner_id, &text, self.notice_ttl()).await;
                summary.error = Some(e);
            }
        }

        self.registry.complete_job(job.owner_id, &job.id);
        let outcome = summary.outcome();
        info!(
            job_id = %job.id,
            ?outcome,
            delivered = summary.delivered(),
            failed = summary.failed(),
            "Job finished"
        );
        let _ = self.event_tx.send(EngineEvent::JobFinished {
            job_id: job.id.clone(),
            owner_id: job.owner_id,
            outcome,
        });
        summary
    }

    async fn run_single(
        &self,
        job: &Job,
        status: StatusContext,
        metadata: Metadata,
        summary: &mut JobSummary,
    ) {
        let mut item = Item::single(job, metadata);
        let outcome = self.pipeline.run(job, &mut item, &status).await;
        self.close(&status).await;
        self.report_item(job, &item, &outcome).await;
        summary.cancelled = outcome == ItemOutcome::Cancelled;
        summary.items.push(ItemReport::from_item(&item, outcome));
    }

    async fn run_collection(
        &self,
        job: &Job,
        status: StatusContext,
        metadata: Metadata,
        summary: &mut JobSummary,
    ) {
        let mut sequence = match expander::expand(job, metadata) {
            Ok(sequence) => sequence,
            Err(e) => {
                warn!(job_id = %job.id, "Collection expansion failed: {}", e);
                self.close(&status).await;
                self.notice(job.owner_id, messages::EMPTY_COLLECTION, self.notice_ttl())
                    .await;
                summary.error = Some(e);
                return;
            }
        };
        info!(
            job_id = %job.id,
            total = sequence.total(),
            "Expanded collection '{}'",
            sequence.title()
        );
        // each item gets its own status message
        self.close(&status).await;

        for mut item in sequence.by_ref() {
            if job.is_cancelled() {
                summary.cancelled = true;
                self.notice(job.owner_id, messages::CANCELLED, self.cancel_notice_ttl())
                    .await;
                break;
            }

            let opening = StatusTemplate::new(
                job.request.url.clone(),
                messages::PREPARING,
                Activity::Preparing,
            )
            .with_suffix(item.position_label())
            .render(0, self.config.slow_tick_threshold);
            let item_status = match self.status.open(job.owner_id, &opening).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    debug!(job_id = %job.id, "Could not open item status: {}", e);
                    status.clone()
                }
            };

            let outcome = self.pipeline.run(job, &mut item, &item_status).await;
            self.close(&item_status).await;
            self.report_item(job, &item, &outcome).await;

            let cancelled = outcome == ItemOutcome::Cancelled;
            summary.items.push(ItemReport::from_item(&item, outcome));
            if cancelled {
                summary.cancelled = true;
                break;
            }
        }

        summary.skipped_entries = sequence.skipped();
        if !summary.cancelled {
            self.notice(
                job.owner_id,
                &messages::collection_done(summary.delivered(), summary.failed()),
                Duration::from_secs(self.config.summary_ttl_secs),
            )
            .await;
        }
    }

    async fn report_item(&self, job: &Job, item: &Item, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Delivered { .. } => {}
            ItemOutcome::Failed(e) => {
                self.notice(
                    job.owner_id,
                    &messages::item_failed(item.display_title(), &e.to_string()),
                    self.notice_ttl(),
                )
                .await;
            }
            ItemOutcome::Cancelled => {
                self.notice(job.owner_id, messages::CANCELLED, self.cancel_notice_ttl())
                    .await;
            }
        }
    }

    async fn close(&self, ctx: &StatusContext) {
        if let Err(e) = self.status.close(ctx).await {
            debug!(handle = %ctx.handle, "Could not close status: {}", e);
        }
    }

    /// Send a notice that removes itself after `ttl`.
    async fn notice(&self, owner_id: OwnerId, text: &str, ttl: Duration) {
        match self.status.notify(owner_id, text).await {
            Ok(ctx) => {
                let status = self.status.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    let _ = status.close(&ctx).await;
                });
            }
            Err(e) => debug!(owner_id, "Could not send notice: {}", e),
        }
    }

    fn notice_ttl(&self) -> Duration {
        Duration::from_secs(self.config.notice_ttl_secs)
    }

    fn cancel_notice_ttl(&self) -> Duration {
        Duration::from_secs(self.config.cancel_notice_ttl_secs)
    }
}
