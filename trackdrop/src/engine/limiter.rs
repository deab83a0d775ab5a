//! Global admission gate for the Fetching stage.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::PipelineError;

/// Default number of simultaneous fetches.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 5;

/// Counting gate over a FIFO semaphore.
///
/// Slots are handed out as [`FetchPermit`]s and returned when the permit drops, so
/// every exit path of the holder (success, error, cancellation, panic) releases it.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_use: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// RAII slot of the [`ConcurrencyLimiter`].
#[derive(Debug)]
pub struct FetchPermit {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl Drop for FetchPermit {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_FETCHES)
    }
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_use: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a slot. Returns `CancellationRequested` if `scope` fires first;
    /// the queued waiter is dropped and no slot is consumed.
    pub async fn acquire(
        &self,
        scope: &CancellationToken,
    ) -> Result<FetchPermit, PipelineError> {
        if scope.is_cancelled() {
            return Err(PipelineError::CancellationRequested);
        }

        let permit = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(PipelineError::CancellationRequested),
            permit = self.semaphore.clone().acquire_owned() => permit
                .map_err(|_| PipelineError::FetchFailure("fetch limiter is closed".to_string()))?,
        };

        Ok(self.wrap(permit))
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<FetchPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.wrap(permit))
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> FetchPermit {
        let now = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        FetchPermit {
            _permit: permit,
            in_use: self.in_use.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Highest number of slots held at the same time since creation.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let limiter = ConcurrencyLimiter::new(2);
        let scope = CancellationToken::new();

        let a = limiter.acquire(&scope).await.unwrap();
        let b = limiter.acquire(&scope).await.unwrap();
        assert_eq!(limiter.in_use(), 2);
        assert_eq!(limiter.available(), 0);
        assert!(limiter.try_acquire().is_none());

        drop(a);
        assert_eq!(limiter.in_use(), 1);
        assert!(limiter.try_acquire().is_some());
        drop(b);
        assert_eq!(limiter.available(), 2);
        assert_eq!(limiter.peak(), 2);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn test_waiter_is_cancellable() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire(&CancellationToken::new()).await.unwrap();

        let scope = CancellationToken::new();
        let waiter = {
            let limiter = limiter.clone();
            let scope = scope.clone();
            tokio::spawn(async move { limiter.acquire(&scope).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        scope.cancel();
        let result = waiter.await.unwrap();
        assert_eq!(result, Err(PipelineError::CancellationRequested));

        drop(held);
        assert_eq!(limiter.available(), 1);
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_order() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire(&CancellationToken::new()).await.unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for i in 0..3 {
            let limiter = limiter.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = limiter.acquire(&CancellationToken::new()).await.unwrap();
                order.lock().push(i);
            }));
            // let each waiter enqueue before the next one
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(held);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
