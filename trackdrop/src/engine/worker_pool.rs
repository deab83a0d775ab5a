//! Bounded pool for heavy collaborator calls.
//!
//! Probe, fetch and tagging run external processes and can take minutes. They are
//! spawned onto their own tasks (at most `max_workers` at once) so the orchestrating
//! task stays responsive, and aborted as soon as the owning scope is cancelled.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Room for every fetch slot plus probes and tagging running beside them.
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent offloaded tasks.
    pub max_workers: usize,
    /// Task timeout in seconds.
    ///
    /// A task exceeding this duration is dropped; collaborators must be cancel-safe.
    pub task_timeout_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            task_timeout_secs: 3600, // 1 hour
        }
    }
}

/// Why an offloaded task produced no value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OffloadError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task timed out after {0}s")]
    TimedOut(u64),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("worker pool is shut down")]
    ShutDown,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    semaphore: Arc<Semaphore>,
    active_workers: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::with_config(WorkerPoolConfig::default())
    }
}

impl WorkerPool {
    pub fn with_config(config: WorkerPoolConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        info!("Starting worker pool with {} max workers", max_workers);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            config,
            active_workers: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Run `task` on the pool and wait for its result.
    ///
    /// If `scope` is cancelled (or the pool stops) while waiting for a worker or
    /// while the task runs, the task is aborted, which drops its future and any
    /// `kill_on_drop` child process it owns.
    pub async fn run<F, T>(&self, scope: &CancellationToken, task: F) -> Result<T, OffloadError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(OffloadError::Cancelled),
            _ = self.cancellation_token.cancelled() => return Err(OffloadError::ShutDown),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| OffloadError::ShutDown)?
            }
        };

        self.active_workers.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(self.active_workers.clone());
        let timeout_secs = self.config.task_timeout_secs;

        let mut handle = tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            tokio::time::timeout(Duration::from_secs(timeout_secs), task).await
        });

        tokio::select! {
            biased;
            _ = scope.cancelled() => {
                handle.abort();
                debug!("Aborted offloaded task on cancellation");
                Err(OffloadError::Cancelled)
            }
            _ = self.cancellation_token.cancelled() => {
                handle.abort();
                Err(OffloadError::ShutDown)
            }
            joined = &mut handle => match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_elapsed)) => Err(OffloadError::TimedOut(timeout_secs)),
                Err(e) if e.is_panic() => Err(OffloadError::Panicked(e.to_string())),
                Err(_) => Err(OffloadError::Cancelled),
            }
        }
    }

    /// Stop the pool; running and queued tasks are aborted.
    pub fn stop(&self) {
        info!("Stopping worker pool");
        self.cancellation_token.cancel();
    }

    /// Get the number of active workers.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers.max(1)
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.task_timeout_secs, 3600);
    }

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = WorkerPool::default();
        let scope = CancellationToken::new();
        assert_eq!(pool.run(&scope, async { 21 * 2 }).await, Ok(42));
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_aborts_running_task() {
        let pool = Arc::new(WorkerPool::default());
        let scope = CancellationToken::new();
        let dropped = Arc::new(AtomicUsize::new(0));

        struct DropFlag(Arc<AtomicUsize>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let flag = DropFlag(dropped.clone());
        let run = {
            let pool = pool.clone();
            let scope = scope.clone();
            tokio::spawn(async move {
                pool.run(&scope, async move {
                    let _flag = flag;
                    tokio::time::sleep(Duration::from_secs(60)).await;
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.active_count(), 1);
        scope.cancel();

        assert_eq!(run.await.unwrap(), Err(OffloadError::Cancelled));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let pool = WorkerPool::default();
        let scope = CancellationToken::new();
        let result = pool
            .run(&scope, async move { panic!("boom") })
            .await;
        assert!(matches!(result, Err(OffloadError::Panicked(_))));
    }

    #[tokio::test]
    async fn test_stopped_pool_rejects_work() {
        let pool = WorkerPool::default();
        pool.stop();
        assert!(!pool.is_running());
        let result = pool.run(&CancellationToken::new(), async { 1 }).await;
        assert_eq!(result, Err(OffloadError::ShutDown));
    }
}
