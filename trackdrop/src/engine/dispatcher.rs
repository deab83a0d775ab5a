//! Entry point for incoming requests.

use std::sync::Arc;

use tracing::{info, warn};

use super::job::{Job, JobHandle, MediaRequest};
use super::manager::DeliveryEngine;
use super::reporter::StatusTemplate;
use super::traits::{Activity, OwnerId, UsageStats};
use super::messages;
use crate::database::repositories::UsageStore;
use crate::{Error, Result};

/// Classifies requests, registers them and hands them to the engine.
pub struct Dispatcher {
    engine: Arc<DeliveryEngine>,
    usage: Arc<dyn UsageStore>,
}

impl Dispatcher {
    pub fn new(engine: Arc<DeliveryEngine>, usage: Arc<dyn UsageStore>) -> Self {
        Self { engine, usage }
    }

    pub fn engine(&self) -> &Arc<DeliveryEngine> {
        &self.engine
    }

    /// Accept a request from `owner_id`.
    ///
    /// Text without a recognizable media link is rejected with
    /// [`Error::Validation`] and no job is created.
    pub async fn submit(&self, owner_id: OwnerId, raw_request: &str) -> Result<JobHandle> {
        let request = MediaRequest::parse(raw_request)
            .ok_or_else(|| Error::validation("no recognizable media link in request"))?;

        let job = Arc::new(Job::new(owner_id, request));
        let registry = self.engine.registry();
        registry.register(&job);

        let opening = StatusTemplate::new(
            job.request.url.clone(),
            messages::PREPARING,
            Activity::Preparing,
        )
        .render(0, self.engine.config().slow_tick_threshold);
        let status = match self.engine.status_surface().open(owner_id, &opening).await {
            Ok(status) => status,
            Err(e) => {
                registry.complete_job(owner_id, &job.id);
                return Err(Error::Other(format!("could not open status message: {e}")));
            }
        };

        // only requests the user actually saw acknowledged are counted
        if let Err(e) = self.usage.record_use(owner_id).await {
            warn!(owner_id, "Failed to record usage: {}", e);
        }

        info!(
            owner_id,
            job_id = %job.id,
            kind = ?job.request.kind,
            "Accepted request {}",
            job.request.url
        );
        Ok(self.engine.launch(job, status))
    }

    /// Cancel everything `owner_id` has in flight.
    pub fn cancel_all(&self, owner_id: OwnerId) -> usize {
        self.engine.registry().cancel_all(owner_id)
    }

    pub async fn usage(&self) -> Result<UsageStats> {
        self.usage.snapshot().await
    }
}
