//! Jobs, items and their outcomes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::traits::{Metadata, OwnerId};
use super::{PipelineError, Stage};
use crate::{Error, Result};

/// How a request was classified on submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Single,
    Collection,
}

/// A recognized media request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub url: String,
    pub kind: RequestKind,
}

/// One user request; owns the cancellation scope of everything it spawns.
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub owner_id: OwnerId,
    pub request: MediaRequest,
    pub scope: CancellationToken,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(owner_id: OwnerId, request: MediaRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id,
            request,
            scope: CancellationToken::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }
}

/// One unit of content moving through the pipeline.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: String,
    pub parent_job_id: String,
    /// URL handed to the media source.
    pub identifier: String,
    /// Known after probing.
    pub content_id: Option<String>,
    pub title: Option<String>,
    pub attribution: Option<String>,
    pub thumbnail_ref: Option<String>,
    pub ordinal_index: usize,
    /// Size of the parent collection, `None` for single requests.
    pub collection_size: Option<usize>,
    /// Metadata already known before the item starts (request probe or collection entry).
    pub prefetched: Option<Metadata>,
    stage: Stage,
    history: Vec<Stage>,
}

impl Item {
    fn new(job_id: &str, identifier: String, ordinal_index: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_job_id: job_id.to_string(),
            identifier,
            content_id: None,
            title: None,
            attribution: None,
            thumbnail_ref: None,
            ordinal_index,
            collection_size: None,
            prefetched: None,
            stage: Stage::Queued,
            history: vec![Stage::Queued],
        }
    }

    /// Item for a single request whose metadata was probed up front.
    pub fn single(job: &Job, metadata: Metadata) -> Self {
        let mut item = Self::new(&job.id, metadata.source_url.clone(), 0);
        item.title = Some(metadata.title.clone());
        item.prefetched = Some(metadata);
        item
    }

    /// Item for the entry at `ordinal_index` of a collection of `total` entries.
    pub fn from_entry(job_id: &str, ordinal_index: usize, total: usize, entry: Metadata) -> Self {
        let mut item = Self::new(job_id, entry.source_url.clone(), ordinal_index);
        item.collection_size = Some(total);
        item.title = Some(entry.title.clone());
        item.prefetched = Some(entry);
        item
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage the item has been in, oldest first.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Move to `to`; invalid transitions are rejected and logged.
    pub fn advance(&mut self, to: Stage) -> Result<()> {
        match self.stage.transition_to(to) {
            Ok(next) => {
                self.stage = next;
                self.history.push(next);
                Ok(())
            }
            Err(e) => {
                warn!(item_id = %self.id, "{}", e);
                Err(e)
            }
        }
    }

    /// Record the probed metadata on the item.
    pub fn resolve(&mut self, metadata: &Metadata) {
        self.content_id = Some(metadata.content_id.clone());
        self.title = Some(metadata.title.clone());
        self.attribution = Some(metadata.attribution.clone());
        self.thumbnail_ref = metadata.thumbnail_ref.clone();
    }

    /// `(2/5) Title` for collection items, `None` for single requests.
    pub fn position_label(&self) -> Option<String> {
        self.collection_size.map(|total| {
            format!(
                "({}/{}) {}",
                self.ordinal_index + 1,
                total,
                self.display_title()
            )
        })
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.identifier)
    }
}

/// Terminal result of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Delivered {
        delivery_ref: String,
        from_cache: bool,
    },
    Failed(PipelineError),
    Cancelled,
}

impl ItemOutcome {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Delivered { .. } => Stage::Done,
            Self::Failed(_) => Stage::Failed,
            Self::Cancelled => Stage::Cancelled,
        }
    }
}

/// What happened to one item.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub item_id: String,
    pub ordinal_index: usize,
    pub content_id: Option<String>,
    pub title: Option<String>,
    pub outcome: ItemOutcome,
    pub stages: Vec<Stage>,
}

impl ItemReport {
    pub fn from_item(item: &Item, outcome: ItemOutcome) -> Self {
        Self {
            item_id: item.id.clone(),
            ordinal_index: item.ordinal_index,
            content_id: item.content_id.clone(),
            title: item.title.clone(),
            outcome,
            stages: item.history().to_vec(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Delivered { .. })
    }
}

/// Overall job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    PartiallyCompleted,
    Failed,
    Cancelled,
}

/// Summary returned when a job finishes.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_id: String,
    pub owner_id: OwnerId,
    /// Kind as resolved by the probe (the probe is authoritative).
    pub kind: RequestKind,
    pub items: Vec<ItemReport>,
    /// Collection entries skipped because they were empty or unresolvable.
    pub skipped_entries: usize,
    /// Job-level failure (request probe or empty collection).
    pub error: Option<PipelineError>,
    pub cancelled: bool,
}

impl JobSummary {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            owner_id: job.owner_id,
            kind: job.request.kind,
            items: Vec::new(),
            skipped_entries: 0,
            error: None,
            cancelled: false,
        }
    }

    pub fn delivered(&self) -> usize {
        self.items.iter().filter(|r| r.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|r| matches!(r.outcome, ItemOutcome::Failed(_)))
            .count()
    }

    pub fn outcome(&self) -> JobOutcome {
        if self.cancelled {
            JobOutcome::Cancelled
        } else if self.error.is_some() || self.delivered() == 0 {
            JobOutcome::Failed
        } else if self.failed() > 0 {
            JobOutcome::PartiallyCompleted
        } else {
            JobOutcome::Completed
        }
    }
}

/// Caller-side handle to a running job.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: String,
    pub owner_id: OwnerId,
    pub request: MediaRequest,
    job: Arc<Job>,
    join: JoinHandle<JobSummary>,
}

impl JobHandle {
    pub(crate) fn new(job: Arc<Job>, join: JoinHandle<JobSummary>) -> Self {
        Self {
            job_id: job.id.clone(),
            owner_id: job.owner_id,
            request: job.request.clone(),
            job,
            join,
        }
    }

    /// Cancel this job only.
    pub fn cancel(&self) {
        self.job.scope.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.job.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> Result<JobSummary> {
        self.join
            .await
            .map_err(|e| Error::Other(format!("job task {} failed: {}", self.job_id, e)))
    }
}
