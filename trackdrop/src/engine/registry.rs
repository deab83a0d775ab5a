//! Per-user tracking of live jobs and reporters.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::job::{Item, Job};
use super::traits::OwnerId;

#[derive(Debug)]
struct JobEntry {
    scope: CancellationToken,
    reporters: HashMap<String, CancellationToken>,
    active_items: HashSet<String>,
    created_at: DateTime<Utc>,
}

/// Everything one owner currently has in flight.
#[derive(Debug, Default)]
struct UserTaskSet {
    jobs: HashMap<String, JobEntry>,
}

/// Snapshot of one tracked job.
#[derive(Debug, Clone)]
pub struct TrackedJob {
    pub job_id: String,
    pub active_items: usize,
    pub reporters: usize,
    pub created_at: DateTime<Utc>,
}

/// Concurrent owner -> jobs map used for bulk cancellation.
#[derive(Debug, Default)]
pub struct JobRegistry {
    users: DashMap<OwnerId, UserTaskSet>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: &Job) {
        self.users.entry(job.owner_id).or_default().jobs.insert(
            job.id.clone(),
            JobEntry {
                scope: job.scope.clone(),
                reporters: HashMap::new(),
                active_items: HashSet::new(),
                created_at: job.created_at,
            },
        );
        debug!(owner_id = job.owner_id, job_id = %job.id, "Registered job");
    }

    /// Track a reporter loop. Returns `false` (and leaves the loop untracked) when
    /// the job is no longer registered, e.g. because it was cancelled meanwhile.
    pub fn track_reporter(
        &self,
        owner_id: OwnerId,
        job_id: &str,
        reporter_id: &str,
        token: CancellationToken,
    ) -> bool {
        let Some(mut user) = self.users.get_mut(&owner_id) else {
            return false;
        };
        match user.jobs.get_mut(job_id) {
            Some(entry) => {
                entry.reporters.insert(reporter_id.to_string(), token);
                true
            }
            None => false,
        }
    }

    pub fn untrack_reporter(&self, owner_id: OwnerId, job_id: &str, reporter_id: &str) {
        if let Some(mut user) = self.users.get_mut(&owner_id)
            && let Some(entry) = user.jobs.get_mut(job_id)
        {
            entry.reporters.remove(reporter_id);
        }
    }

    pub fn on_item_started(&self, owner_id: OwnerId, item: &Item) {
        if let Some(mut user) = self.users.get_mut(&owner_id)
            && let Some(entry) = user.jobs.get_mut(&item.parent_job_id)
        {
            entry.active_items.insert(item.id.clone());
        }
    }

    pub fn on_item_complete(&self, owner_id: OwnerId, item: &Item) {
        if let Some(mut user) = self.users.get_mut(&owner_id)
            && let Some(entry) = user.jobs.get_mut(&item.parent_job_id)
        {
            entry.active_items.remove(&item.id);
        }
    }

    /// Drop a finished job. Returns whether it was still registered.
    pub fn complete_job(&self, owner_id: OwnerId, job_id: &str) -> bool {
        let removed = match self.users.get_mut(&owner_id) {
            Some(mut user) => user.jobs.remove(job_id).is_some(),
            None => false,
        };
        self.users.remove_if(&owner_id, |_, user| user.jobs.is_empty());
        removed
    }

    /// Cancel every job of `owner_id`: signal the job scopes, stop the tracked
    /// reporters, then forget the owner. Returns the number of jobs cancelled.
    pub fn cancel_all(&self, owner_id: OwnerId) -> usize {
        let Some((_, user)) = self.users.remove(&owner_id) else {
            return 0;
        };

        for entry in user.jobs.values() {
            entry.scope.cancel();
        }
        for entry in user.jobs.values() {
            for token in entry.reporters.values() {
                token.cancel();
            }
        }

        let cancelled = user.jobs.len();
        if cancelled > 0 {
            info!(owner_id, cancelled, "Cancelled all jobs of owner");
        }
        cancelled
    }

    /// Cancel a single job. Returns whether it was registered.
    pub fn cancel_job(&self, owner_id: OwnerId, job_id: &str) -> bool {
        let entry = match self.users.get_mut(&owner_id) {
            Some(mut user) => user.jobs.remove(job_id),
            None => None,
        };
        self.users.remove_if(&owner_id, |_, user| user.jobs.is_empty());

        match entry {
            Some(entry) => {
                entry.scope.cancel();
                for token in entry.reporters.values() {
                    token.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Cancel everything of every owner (shutdown).
    pub fn cancel_everything(&self) -> usize {
        self.owners()
            .into_iter()
            .map(|owner_id| self.cancel_all(owner_id))
            .sum()
    }

    pub fn active_jobs(&self, owner_id: OwnerId) -> usize {
        self.users
            .get(&owner_id)
            .map(|user| user.jobs.len())
            .unwrap_or(0)
    }

    pub fn jobs(&self, owner_id: OwnerId) -> Vec<TrackedJob> {
        self.users
            .get(&owner_id)
            .map(|user| {
                user.jobs
                    .iter()
                    .map(|(job_id, entry)| TrackedJob {
                        job_id: job_id.clone(),
                        active_items: entry.active_items.len(),
                        reporters: entry.reporters.len(),
                        created_at: entry.created_at,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn owners(&self) -> Vec<OwnerId> {
        self.users.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
