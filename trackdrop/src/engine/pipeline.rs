//! Per-item pipeline: Probe -> (CacheHit | Fetch -> PostProcess) -> Deliver.
//!
//! Each stage checks the job scope on entry and after every await. Failures end the
//! item with a terminal outcome instead of unwinding into the caller, and the local
//! artifact is removed on every exit path.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::attribution::dedupe_attribution;
use super::job::{Item, ItemOutcome, Job};
use super::limiter::ConcurrencyLimiter;
use super::manager::EngineEvent;
use super::messages;
use super::registry::JobRegistry;
use super::reporter::{ProgressReporter, ReporterHandle, StatusTemplate};
use super::traits::{
    Activity, CachedDelivery, DeliverySurface, MediaSource, Metadata, StatusContext, TagSet,
    Tagger, Upload,
};
use super::worker_pool::{OffloadError, WorkerPool};
use super::{PipelineError, Stage};
use crate::database::repositories::CacheStore;
use crate::utils::fs::{
    ensure_dir_all, remove_dir_if_exists, remove_dir_if_exists_sync, remove_file_if_exists,
    remove_file_if_exists_sync,
};

/// Owns the scratch directory of one item. Every file a collaborator writes for the
/// item (partial downloads, intermediate formats, tagged copies) lands in it.
///
/// Cleanup normally runs through [`ArtifactGuard::cleanup`]; `Drop` is the fallback
/// when the owning task is aborted.
#[derive(Debug)]
pub(crate) struct ArtifactGuard {
    scratch: PathBuf,
    primary: PathBuf,
    // returned by collaborators outside the scratch directory
    strays: Vec<PathBuf>,
    cleaned: bool,
}

impl ArtifactGuard {
    pub(crate) fn new(download_dir: &Path, item_id: &str) -> Self {
        let scratch = download_dir.join(item_id);
        Self {
            primary: scratch.join(format!("{item_id}.mp3")),
            scratch,
            strays: Vec::new(),
            cleaned: false,
        }
    }

    pub(crate) fn scratch(&self) -> &Path {
        &self.scratch
    }

    pub(crate) fn primary(&self) -> &Path {
        &self.primary
    }

    pub(crate) fn track(&mut self, path: &Path) {
        if !path.starts_with(&self.scratch) && !self.strays.iter().any(|p| p == path) {
            self.strays.push(path.to_path_buf());
        }
    }

    pub(crate) async fn cleanup(mut self) {
        if remove_dir_if_exists(&self.scratch).await {
            debug!("Removed artifacts under {}", self.scratch.display());
        }
        for path in &self.strays {
            remove_file_if_exists(path).await;
        }
        self.cleaned = true;
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if !self.cleaned {
            remove_dir_if_exists_sync(&self.scratch);
            for path in &self.strays {
                remove_file_if_exists_sync(path);
            }
        }
    }
}

fn ensure_active(scope: &CancellationToken) -> Result<(), PipelineError> {
    if scope.is_cancelled() {
        Err(PipelineError::CancellationRequested)
    } else {
        Ok(())
    }
}

/// Collaborators of the pipeline.
#[derive(Clone)]
pub struct PipelineDeps {
    pub source: Arc<dyn MediaSource>,
    pub tagger: Arc<dyn Tagger>,
    pub delivery: Arc<dyn DeliverySurface>,
    pub cache: Arc<dyn CacheStore>,
}

/// Drives single items through their stages.
pub(crate) struct ItemPipeline {
    deps: PipelineDeps,
    limiter: ConcurrencyLimiter,
    workers: Arc<WorkerPool>,
    registry: Arc<JobRegistry>,
    reporter: ProgressReporter,
    download_dir: PathBuf,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl ItemPipeline {
    pub(crate) fn new(
        deps: PipelineDeps,
        limiter: ConcurrencyLimiter,
        workers: Arc<WorkerPool>,
        registry: Arc<JobRegistry>,
        reporter: ProgressReporter,
        download_dir: PathBuf,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            deps,
            limiter,
            workers,
            registry,
            reporter,
            download_dir,
            event_tx,
        }
    }

    /// Run `item` to a terminal stage.
    pub(crate) async fn run(
        &self,
        job: &Job,
        item: &mut Item,
        status: &StatusContext,
    ) -> ItemOutcome {
        self.registry.on_item_started(job.owner_id, item);
        let mut artifacts = ArtifactGuard::new(&self.download_dir, &item.id);

        let outcome = match self.drive(job, item, status, &mut artifacts).await {
            Ok(outcome) => outcome,
            Err(PipelineError::CancellationRequested) => ItemOutcome::Cancelled,
            Err(e) => ItemOutcome::Failed(e),
        };

        artifacts.cleanup().await;
        self.enter(job, item, outcome.stage());
        self.registry.on_item_complete(job.owner_id, item);

        match &outcome {
            ItemOutcome::Delivered { from_cache, .. } => info!(
                job_id = %job.id,
                content_id = item.content_id.as_deref().unwrap_or_default(),
                from_cache,
                "Delivered '{}'",
                item.display_title()
            ),
            ItemOutcome::Failed(e) => warn!(
                job_id = %job.id,
                item_id = %item.id,
                kind = e.kind(),
                "Item '{}' failed: {}",
                item.display_title(),
                e
            ),
            ItemOutcome::Cancelled => info!(
                job_id = %job.id,
                item_id = %item.id,
                "Item '{}' cancelled",
                item.display_title()
            ),
        }

        let _ = self.event_tx.send(EngineEvent::ItemFinished {
            job_id: job.id.clone(),
            item_id: item.id.clone(),
            content_id: item.content_id.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn drive(
        &self,
        job: &Job,
        item: &mut Item,
        status: &StatusContext,
        artifacts: &mut ArtifactGuard,
    ) -> Result<ItemOutcome, PipelineError> {
        let scope = &job.scope;

        ensure_active(scope)?;
        self.enter(job, item, Stage::Probing);
        let metadata = match item.prefetched.take() {
            Some(metadata) => metadata,
            None => self.probe(scope, &item.identifier).await?,
        }
        .validate_item()?;
        item.resolve(&metadata);
        let content_id = metadata.content_id.clone();
        ensure_active(scope)?;

        if let Some(delivery_ref) = self.lookup_cache(&content_id).await {
            ensure_active(scope)?;
            self.enter(job, item, Stage::CacheHit);
            self.enter(job, item, Stage::Delivering);
            match self.deliver_cached(job, item, status, &delivery_ref).await {
                Ok(()) => {
                    return Ok(ItemOutcome::Delivered {
                        delivery_ref,
                        from_cache: true,
                    });
                }
                Err(PipelineError::StaleCacheEntry { content_id }) => {
                    info!(job_id = %job.id, %content_id, "Cached delivery is stale, fetching again");
                    if let Err(e) = self.deps.cache.evict(&content_id).await {
                        warn!(%content_id, "Failed to evict stale cache entry: {}", e);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        ensure_active(scope)?;
        let reporter = self.start_reporter(job, status, stage_template(job, item, Stage::Fetching));
        let fetched = self.fetch(job, item, artifacts).await;
        self.stop_reporter(job, reporter).await;
        let fetched = fetched?;

        ensure_active(scope)?;
        self.enter(job, item, Stage::PostProcessing);
        let tags = TagSet {
            title: metadata.title.clone(),
            attribution: dedupe_attribution(&metadata.attribution),
            thumbnail_ref: metadata.thumbnail_ref.clone(),
        };
        let reporter = self.start_reporter(
            job,
            status,
            stage_template(job, item, Stage::PostProcessing),
        );
        let tagger = self.deps.tagger.clone();
        let task_tags = tags.clone();
        let tagged = self
            .offload(
                scope,
                async move { tagger.apply_tags(&fetched, &task_tags).await },
                PipelineError::ProcessingFailure,
            )
            .await;
        self.stop_reporter(job, reporter).await;
        let tagged = tagged?;
        artifacts.track(&tagged.path);

        ensure_active(scope)?;
        self.enter(job, item, Stage::Delivering);
        let reporter = self.start_reporter(job, status, stage_template(job, item, Stage::Delivering));
        let upload = Upload {
            path: &tagged.path,
            title: &tags.title,
            attribution: &tags.attribution,
            cover: tagged.cover.as_deref(),
        };
        let delivered = tokio::select! {
            biased;
            _ = scope.cancelled() => Err(PipelineError::CancellationRequested),
            res = self.deps.delivery.deliver(job.owner_id, upload) => {
                res.map_err(|e| PipelineError::DeliveryFailure(e.to_string()))
            }
        };
        self.stop_reporter(job, reporter).await;
        let delivery_ref = delivered?;

        ensure_active(scope)?;
        if let Err(e) = self.deps.cache.store(&content_id, &delivery_ref).await {
            warn!(%content_id, "Failed to cache delivery reference: {}", e);
        }

        Ok(ItemOutcome::Delivered {
            delivery_ref,
            from_cache: false,
        })
    }

    /// Acquire a limiter slot and retrieve the media. The slot is held only here.
    async fn fetch(
        &self,
        job: &Job,
        item: &mut Item,
        artifacts: &mut ArtifactGuard,
    ) -> Result<PathBuf, PipelineError> {
        let scope = &job.scope;
        let _permit = self.limiter.acquire(scope).await?;
        ensure_active(scope)?;
        self.enter(job, item, Stage::Fetching);
        ensure_dir_all(artifacts.scratch())
            .await
            .map_err(|e| PipelineError::FetchFailure(e.to_string()))?;

        let source = self.deps.source.clone();
        let identifier = item.identifier.clone();
        let dest = artifacts.primary().to_path_buf();
        let path = self
            .offload(
                scope,
                async move { source.fetch(&identifier, &dest).await },
                PipelineError::FetchFailure,
            )
            .await?;
        artifacts.track(&path);
        ensure_active(scope)?;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(PipelineError::FetchFailure(format!(
                "fetch reported success but {} does not exist",
                path.display()
            )));
        }
        Ok(path)
    }

    async fn deliver_cached(
        &self,
        job: &Job,
        item: &Item,
        status: &StatusContext,
        delivery_ref: &str,
    ) -> Result<(), PipelineError> {
        let scope = &job.scope;
        let reporter = self.start_reporter(job, status, stage_template(job, item, Stage::Delivering));
        let result = tokio::select! {
            biased;
            _ = scope.cancelled() => Err(PipelineError::CancellationRequested),
            res = self.deps.delivery.deliver_cached(job.owner_id, delivery_ref) => Ok(res),
        };
        self.stop_reporter(job, reporter).await;

        let content_id = item.content_id.clone().unwrap_or_default();
        match result? {
            Ok(CachedDelivery::Delivered) => ensure_active(scope),
            Ok(CachedDelivery::Stale) => Err(PipelineError::StaleCacheEntry { content_id }),
            Err(e) => {
                debug!(%content_id, "Cached delivery failed: {}", e);
                Err(PipelineError::StaleCacheEntry { content_id })
            }
        }
    }

    /// Probe `identifier` on the worker pool.
    pub(crate) async fn probe(
        &self,
        scope: &CancellationToken,
        identifier: &str,
    ) -> Result<Metadata, PipelineError> {
        let source = self.deps.source.clone();
        let identifier = identifier.to_string();
        self.offload(
            scope,
            async move { source.probe(&identifier).await },
            PipelineError::ExtractionFailure,
        )
        .await
    }

    async fn lookup_cache(&self, content_id: &str) -> Option<String> {
        match self.deps.cache.lookup(content_id).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(%content_id, "Cache lookup failed, treating as miss: {}", e);
                None
            }
        }
    }

    async fn offload<T, F>(
        &self,
        scope: &CancellationToken,
        task: F,
        classify: fn(String) -> PipelineError,
    ) -> Result<T, PipelineError>
    where
        F: Future<Output = crate::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        match self.workers.run(scope, task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(e.to_string())),
            Err(OffloadError::Cancelled | OffloadError::ShutDown) => {
                Err(PipelineError::CancellationRequested)
            }
            Err(e) => Err(classify(e.to_string())),
        }
    }

    fn enter(&self, job: &Job, item: &mut Item, stage: Stage) {
        if item.advance(stage).is_ok() {
            debug!(job_id = %job.id, item_id = %item.id, %stage, "Stage entered");
            let _ = self.event_tx.send(EngineEvent::StageChanged {
                job_id: job.id.clone(),
                item_id: item.id.clone(),
                ordinal_index: item.ordinal_index,
                stage,
            });
        }
    }

    pub(crate) fn start_reporter(
        &self,
        job: &Job,
        status: &StatusContext,
        template: StatusTemplate,
    ) -> ReporterHandle {
        let handle = self.reporter.start(status.clone(), template, &job.scope);
        if !self
            .registry
            .track_reporter(job.owner_id, &job.id, handle.id(), handle.token())
        {
            debug!(job_id = %job.id, "Job no longer tracked, reporter runs untracked");
        }
        handle
    }

    pub(crate) async fn stop_reporter(&self, job: &Job, handle: ReporterHandle) {
        self.registry
            .untrack_reporter(job.owner_id, &job.id, handle.id());
        handle.stop().await;
    }
}

/// Status template for the stage window `stage` of `item`.
fn stage_template(job: &Job, item: &Item, stage: Stage) -> StatusTemplate {
    let in_collection = item.collection_size.is_some();
    let (label, activity) = match stage {
        Stage::Fetching if in_collection => (messages::COLLECTION_DOWNLOADING, Activity::Downloading),
        Stage::Fetching => (messages::DOWNLOADING, Activity::Downloading),
        Stage::PostProcessing if in_collection => {
            (messages::COLLECTION_PROCESSING, Activity::Processing)
        }
        Stage::PostProcessing => (messages::PROCESSING, Activity::Processing),
        _ if in_collection => (messages::COLLECTION_SENDING, Activity::Uploading),
        _ => (messages::SENDING, Activity::Uploading),
    };
    StatusTemplate::new(job.request.url.clone(), label, activity).with_suffix(item.position_label())
}
